//! Browser build of the relay planning sheet.
//!
//! Links the same `relay_sheet` engine as the CLI, so every derived value
//! shown here is bit-identical to the canonical server read. Edits apply
//! locally first (cascading recompute), queue in `localStorage` while
//! offline, and replay strictly in order once connectivity returns.

use chrono::Utc;
use leptos::*;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{Request, RequestInit, Response, Storage};

use relay_sheet::format::{
    format_hms, format_pace, format_race_local_friendly, format_race_local_input, parse_pace,
    parse_race_local,
};
use relay_sheet::heatmap::{self, heat_color, van_fill, HeatColumn};
use relay_sheet::replica::{LocalReplica, QueuedWrite};
use relay_sheet::store::pace_edit_ops;
use relay_sheet::{
    estimated_finish_time, validate, DerivedRow, SheetView, Snapshot, WriteOp,
};

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const APP_COMMIT: &str = env!("GIT_COMMIT_HASH");

const OFFLINE_OPS_KEY: &str = "relay-sheet-offline-ops";
const TABLE_CACHE_KEY: &str = "relay-sheet-table-cache";

fn local_storage() -> Option<Storage> {
    web_sys::window()?.local_storage().ok().flatten()
}

/// Rebuild the replica from `localStorage`: cached snapshot plus any queued
/// offline edits. Anything unreadable is simply dropped.
fn read_cached_replica() -> LocalReplica {
    let mut replica = LocalReplica::new();
    let Some(storage) = local_storage() else {
        return replica;
    };
    if let Ok(Some(raw)) = storage.get_item(TABLE_CACHE_KEY) {
        if let Ok(snapshot) = serde_json::from_str::<Snapshot>(&raw) {
            if validate(&snapshot).is_ok() {
                replica.adopt(snapshot);
            }
        }
    }
    if let Ok(Some(raw)) = storage.get_item(OFFLINE_OPS_KEY) {
        if let Ok(queue) = serde_json::from_str::<Vec<QueuedWrite>>(&raw) {
            replica.retain_pending(queue);
        }
    }
    replica
}

/// Write-through cache so a fast refresh never loses the last edit.
fn write_cache(replica: &LocalReplica) {
    let Some(storage) = local_storage() else {
        return;
    };
    if let Some(snapshot) = replica.snapshot() {
        if let Ok(json) = serde_json::to_string(snapshot) {
            let _ = storage.set_item(TABLE_CACHE_KEY, &json);
        }
    }
    if let Ok(json) = serde_json::to_string(replica.pending()) {
        let _ = storage.set_item(OFFLINE_OPS_KEY, &json);
    }
}

async fn fetch_snapshot() -> Option<Snapshot> {
    let window = web_sys::window()?;
    let value = JsFuture::from(window.fetch_with_str("/api/table")).await.ok()?;
    let resp: Response = value.dyn_into().ok()?;
    if !resp.ok() {
        return None;
    }
    let text = JsFuture::from(resp.text().ok()?).await.ok()?;
    let raw = text.as_string()?;
    let snapshot: Snapshot = serde_json::from_str(&raw).ok()?;
    validate(&snapshot).ok()?;
    Some(snapshot)
}

async fn push_write(op: &WriteOp) -> bool {
    let Some(window) = web_sys::window() else {
        return false;
    };
    let Ok(body) = serde_json::to_string(op) else {
        return false;
    };
    let mut init = RequestInit::new();
    init.method("POST");
    init.body(Some(&JsValue::from_str(&body)));
    let Ok(request) = Request::new_with_str_and_init("/api/writes", &init) else {
        return false;
    };
    let _ = request.headers().set("Content-Type", "application/json");
    match JsFuture::from(window.fetch_with_request(&request)).await {
        Ok(value) => value
            .dyn_into::<Response>()
            .map(|resp| resp.ok())
            .unwrap_or(false),
        Err(_) => false,
    }
}

fn install_connectivity_listeners(set_offline: WriteSignal<bool>) {
    let Some(window) = web_sys::window() else {
        return;
    };
    set_offline.set(!window.navigator().on_line());
    let online = Closure::<dyn FnMut()>::new(move || set_offline.set(false));
    let offline = Closure::<dyn FnMut()>::new(move || set_offline.set(true));
    let _ = window.add_event_listener_with_callback("online", online.as_ref().unchecked_ref());
    let _ = window.add_event_listener_with_callback("offline", offline.as_ref().unchecked_ref());
    online.forget();
    offline.forget();
}

/// Leg 1's input shows the race start while no actual has been recorded.
/// Display only: the engine never substitutes one for the other.
fn displayed_actual_start(row: &DerivedRow, view: &SheetView) -> String {
    let shown = row.actual_start_time.or(if row.leg == 1 {
        view.race_start_time
    } else {
        None
    });
    format_race_local_input(shown)
}

#[component]
pub fn App() -> impl IntoView {
    let (replica, set_replica) = create_signal(read_cached_replica());
    let (offline, set_offline) = create_signal(false);
    let (busy, set_busy) = create_signal(false);
    let (show_leg_stats, set_show_leg_stats) = create_signal(true);

    install_connectivity_listeners(set_offline);

    let view = create_memo(move |_| replica.with(|r| r.derive()));
    let pending = move || replica.with(|r| r.pending_len());

    // Replay the queue in order, then adopt fresh server truth. Edits made
    // while the replay is in flight land behind the retained failures.
    let sync_now = move || {
        if busy.get_untracked() || offline.get_untracked() {
            return;
        }
        set_busy.set(true);
        spawn_local(async move {
            let mut drained = Vec::new();
            set_replica.update(|r| drained = r.drain_pending());

            let mut failed = Vec::new();
            for item in drained {
                if !push_write(&item.op).await {
                    failed.push(item);
                }
            }

            let fresh = fetch_snapshot().await;
            set_replica.update(|r| {
                let queued_during_replay = r.drain_pending();
                failed.extend(queued_during_replay);
                r.retain_pending(failed);
                if let Some(fresh) = fresh {
                    r.adopt(fresh);
                }
                write_cache(r);
            });
            set_busy.set(false);
        });
    };

    // Fires on mount and again whenever connectivity returns.
    create_effect(move |_| {
        if !offline.get() {
            sync_now();
        }
    });

    let commit = move |ops: Vec<WriteOp>| {
        let now = Utc::now();
        set_replica.update(|r| {
            for op in ops {
                let _ = r.apply_local(op, now);
            }
            write_cache(r);
        });
        if !offline.get_untracked() {
            sync_now();
        }
    };

    let commit_pace = move |leg: u8, raw: String| {
        let trimmed = raw.trim().to_string();
        let parsed = if trimmed.is_empty() {
            None
        } else {
            match parse_pace(&trimmed) {
                Some(pace) => Some(pace),
                // Ignore unparseable input rather than clearing data.
                None => return,
            }
        };
        let ops = replica
            .with_untracked(|r| r.snapshot().map(|s| pace_edit_ops(s, leg, parsed)));
        if let Some(Ok(ops)) = ops {
            commit(ops);
        }
    };

    let commit_start = move |leg: u8, raw: String| {
        let trimmed = raw.trim().to_string();
        let at = if trimmed.is_empty() {
            None
        } else {
            match parse_race_local(&trimmed) {
                Some(at) => Some(at),
                None => return,
            }
        };
        commit(vec![WriteOp::ActualStart {
            leg,
            actual_start_time: at,
        }]);
    };

    let commit_race_start = move |raw: String| {
        let at = if raw.trim().is_empty() {
            None
        } else {
            match parse_race_local(raw.trim()) {
                Some(at) => Some(at),
                None => return,
            }
        };
        commit(vec![WriteOp::RaceStart {
            race_start_time: at,
        }]);
    };

    let commit_finish = move |raw: String| {
        let at = if raw.trim().is_empty() {
            None
        } else {
            match parse_race_local(raw.trim()) {
                Some(at) => Some(at),
                None => return,
            }
        };
        commit(vec![WriteOp::FinishTime { finish_time: at }]);
    };

    let banner = move || {
        let count = pending();
        if offline.get() {
            Some(format!(
                "OFFLINE MODE — {count} pending edit{} will sync when connection returns.",
                if count == 1 { "" } else { "s" }
            ))
        } else if busy.get() && count > 0 {
            Some(format!("SYNCING — applying {count} pending edits"))
        } else if count > 0 {
            Some(format!("Pending edits: {count}"))
        } else {
            None
        }
    };

    view! {
        <div class="sheet-app">
            {move || banner().map(|text| view! { <section class="panel banner">{text}</section> })}

            <section class="panel timing">
                <h2>"Race Timing"</h2>
                <label>
                    <span class="muted">"Race Start Time"</span>
                    <input
                        type="datetime-local"
                        prop:value=move || {
                            view.get()
                                .map(|v| format_race_local_input(v.race_start_time))
                                .unwrap_or_default()
                        }
                        on:change=move |ev| commit_race_start(event_target_value(&ev))
                    />
                </label>
                <div>
                    <span class="muted">"Estimated Finish Time"</span>
                    <span class="readout">
                        {move || {
                            view.get()
                                .map(|v| format_race_local_friendly(estimated_finish_time(&v)))
                                .unwrap_or_else(|| "-".to_string())
                        }}
                    </span>
                </div>
                <label>
                    <span class="muted">"Actual Finish Time"</span>
                    <input
                        type="datetime-local"
                        prop:value=move || {
                            view.get()
                                .map(|v| format_race_local_input(v.finish_time))
                                .unwrap_or_default()
                        }
                        on:change=move |ev| commit_finish(event_target_value(&ev))
                    />
                </label>
                <button on:click=move |_| set_show_leg_stats.update(|value| *value = !*value)>
                    {move || if show_leg_stats.get() { "Hide Leg Stats" } else { "Show Leg Stats" }}
                </button>
            </section>

            <section class="table-wrap">
                {move || match view.get() {
                    Some(v) => sheet_table(v, show_leg_stats.get(), commit_pace, commit_start),
                    None => view! { <p class="muted">"No sheet data yet."</p> }.into_view(),
                }}
            </section>

            <footer class="muted">
                {format!("relay sheet v{APP_VERSION} ({APP_COMMIT})")}
            </footer>
        </div>
    }
}

fn sheet_table(
    view: SheetView,
    show_leg_stats: bool,
    commit_pace: impl Fn(u8, String) + Copy + 'static,
    commit_start: impl Fn(u8, String) + Copy + 'static,
) -> View {
    let next_leg = heatmap::next_leg_index(&view.rows);
    let heat = view.heatmap;

    let rows = view
        .rows
        .iter()
        .enumerate()
        .map(|(idx, row)| {
            let leg = row.leg;
            let fill = format!("background-color: {}", van_fill(row.runner_number));
            let row_class = if Some(idx) == next_leg { "next-leg" } else { "" };
            let stats = show_leg_stats.then(|| {
                view! {
                    <td style=format!(
                        "background-color: {}",
                        heat_color(HeatColumn::Mileage, row.mileage_mi, heat.mileage)
                    )>{format!("{:.2}", row.mileage_mi)}</td>
                    <td style=format!(
                        "background-color: {}",
                        heat_color(HeatColumn::ElevGain, f64::from(row.elev_gain_ft), heat.elev_gain)
                    )>{row.elev_gain_ft}</td>
                    <td style=format!(
                        "background-color: {}",
                        heat_color(HeatColumn::ElevLoss, f64::from(row.elev_loss_ft), heat.elev_loss)
                    )>{row.elev_loss_ft}</td>
                    <td style=format!(
                        "background-color: {}",
                        heat_color(
                            HeatColumn::NetElevDiff,
                            f64::from(row.net_elev_diff_ft),
                            heat.net_elev_diff,
                        )
                    )>{row.net_elev_diff_ft}</td>
                }
            });
            let pace_value = row
                .pace_override_spm
                .or(row.runner_default_pace_spm)
                .map(|pace| format_pace(Some(pace)))
                .unwrap_or_default();
            let pace_class = if row.is_override { "override" } else { "" };
            let start_value = displayed_actual_start(row, &view);

            view! {
                <tr class=row_class>
                    <td style=fill.clone()>{row.runner_number}</td>
                    <td style=fill.clone()>{row.runner_name.clone()}</td>
                    <td style=fill.clone()>{leg}</td>
                    {stats}
                    <td style=fill.clone() class=pace_class>
                        <input
                            type="text"
                            prop:value=pace_value
                            on:change=move |ev| commit_pace(leg, event_target_value(&ev))
                        />
                        <div class="muted">{format_pace(row.effective_pace_spm)}</div>
                    </td>
                    <td style=fill.clone()>{format_hms(row.estimated_duration_sec)}</td>
                    <td style=fill.clone()>{format_pace(row.actual_pace_spm)}</td>
                    <td style=fill.clone()>
                        {format_race_local_friendly(row.updated_estimated_start)}
                    </td>
                    <td style=fill.clone()>
                        <input
                            type="datetime-local"
                            prop:value=start_value
                            on:change=move |ev| commit_start(leg, event_target_value(&ev))
                        />
                    </td>
                    <td style=fill.clone()>{format_hms(row.delta_to_estimate_sec)}</td>
                    <td style=fill.clone()>{format_hms(row.estimated_van_stint_sec)}</td>
                    <td>
                        <a href=row.exchange_url.clone() target="_blank" rel="noreferrer">
                            {row.exchange_label.clone()}
                        </a>
                    </td>
                </tr>
            }
        })
        .collect_view();

    view! {
        <table>
            <thead>
                <tr>
                    <th>"Runner"</th>
                    <th>"Name"</th>
                    <th>"Leg"</th>
                    {show_leg_stats.then(|| view! {
                        <th>"Leg Mileage"</th>
                        <th>"Elev Gain"</th>
                        <th>"Elev Loss"</th>
                        <th>"Net Elev Diff"</th>
                    })}
                    <th>"Estimated Pace"</th>
                    <th>"Leg Duration at Estimated Pace"</th>
                    <th>"Actual Pace"</th>
                    <th>"Est. Start Time"</th>
                    <th>"Actual Start Time"</th>
                    <th>"Delta to Pre-Race Estimates"</th>
                    <th>"Est. Van Stint Duration"</th>
                    <th>"Exchange Location"</th>
                </tr>
            </thead>
            <tbody>{rows}</tbody>
        </table>
    }
    .into_view()
}

#[wasm_bindgen::prelude::wasm_bindgen(start)]
pub fn start() {
    leptos::mount_to_body(|| view! { <App/> });
}
