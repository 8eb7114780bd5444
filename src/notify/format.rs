// src/notify/format.rs
//! Message composition for one routing group. Pure: the caller supplies the
//! WKT lines (already resolved), the clock and the display zone.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use html_escape::{encode_double_quoted_attribute, encode_text};
use serde_json::Value;
use std::collections::HashMap;

use crate::event::{Event, SourceKind};
use crate::rules::{earthquake_values, severity_rank};
use crate::state::parse_iso8601;

pub const WKT_MAX_CHARS: usize = 600;
const DASH: &str = "—";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedMessage {
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Short type label: the NWS `event` attribute, else the title up to " issued".
fn type_label(ev: &Event) -> &str {
    let raw = ev.str_attr("event").unwrap_or(ev.title.as_str());
    raw.split(" issued").next().unwrap_or(raw)
}

/// `[disaster-alerts] N new event(s) — Type ×count, …  (group)`
pub fn subject_for_group(group: &str, events: &[Event]) -> String {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for ev in events {
        let label = type_label(ev);
        match counts.iter_mut().find(|(l, _)| *l == label) {
            Some((_, n)) => *n += 1,
            None => counts.push((label, 1)),
        }
    }
    // Stable: ties keep first-appearance order.
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    let types = counts
        .iter()
        .map(|(l, n)| format!("{l} ×{n}"))
        .collect::<Vec<_>>()
        .join(", ");
    let total = events.len();
    let plural = if total == 1 { "" } else { "s" };
    format!("[disaster-alerts] {total} new event{plural} — {types}  ({group})")
}

pub fn trim_wkt(wkt: &str) -> String {
    match wkt.char_indices().nth(WKT_MAX_CHARS) {
        Some((cut, _)) => format!("{}…", &wkt[..cut]),
        None => wkt.to_string(),
    }
}

fn is_usgs(ev: &Event) -> bool {
    ev.source_kind() == Some(SourceKind::Usgs)
}

/// Epoch milliseconds (USGS) or an ISO-8601 string.
fn attr_time(ev: &Event, key: &str) -> Option<DateTime<Utc>> {
    match ev.attributes.get(key)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(DateTime::<Utc>::from_timestamp_millis),
        Value::String(s) => parse_iso8601(s),
        _ => None,
    }
}

fn first_time(ev: &Event, keys: &[&str]) -> Option<DateTime<Utc>> {
    keys.iter().find_map(|k| attr_time(ev, k))
}

fn fmt_time(dt: Option<DateTime<Utc>>, tz: Tz) -> String {
    dt.map(|d| d.with_timezone(&tz).format("%Y-%m-%d %H:%M %Z").to_string())
        .unwrap_or_else(|| DASH.to_string())
}

fn time_left(expires: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(expires) = expires else {
        return String::new();
    };
    let secs = (expires - now).num_seconds();
    if secs <= 0 {
        return "(expired)".to_string();
    }
    let (days, hours, minutes) = (secs / 86_400, (secs % 86_400) / 3600, (secs % 3600) / 60);
    if days > 0 {
        format!("({days}d {hours}h left)")
    } else if hours > 0 {
        format!("({hours}h {minutes}m left)")
    } else {
        format!("({minutes}m left)")
    }
}

fn tsunami(ev: &Event) -> &'static str {
    match ev.attributes.get("tsunami") {
        Some(Value::Bool(true)) => "Yes",
        Some(Value::Number(n)) if n.as_i64() == Some(1) => "Yes",
        Some(Value::String(s)) if s.trim() == "1" => "Yes",
        _ => "No",
    }
}

/// PAGER alert level, title-cased ("orange" → "Orange").
fn usgs_alert(ev: &Event) -> String {
    let Some(alert) = ev.str_attr("alert") else {
        return DASH.to_string();
    };
    let mut chars = alert.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => DASH.to_string(),
    }
}

fn or_dash(v: Option<&str>) -> &str {
    v.map(str::trim).filter(|s| !s.is_empty()).unwrap_or(DASH)
}

fn link_or_id(ev: &Event) -> &str {
    ev.link
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(ev.id.trim())
}

/// Key under which near-identical alerts (re-issues of the same warning by
/// the same office and window) collapse into one text block.
fn block_key(ev: &Event) -> String {
    if is_usgs(ev) {
        format!(
            "usgs|{}|{:?}|{:?}",
            ev.title,
            attr_time(ev, "time"),
            attr_time(ev, "updated")
        )
    } else {
        format!(
            "{}|{}|{}|{:?}|{:?}",
            ev.source,
            ev.str_attr("event").unwrap_or(ev.title.as_str()),
            ev.str_attr("senderName").unwrap_or_default(),
            first_time(ev, &["onset", "effective", "sent"]),
            first_time(ev, &["expires", "ends"])
        )
    }
}

/// USGS by origin time, others by expiry; missing times sort last.
fn sort_time(ev: &Event) -> Option<DateTime<Utc>> {
    if is_usgs(ev) {
        attr_time(ev, "time")
    } else {
        first_time(ev, &["expires", "ends"])
    }
}

fn text_block(idx: usize, ev: &Event, wkt: Option<&str>, now: DateTime<Utc>, tz: Tz) -> String {
    let title = ev
        .str_attr("event")
        .or(Some(ev.title.trim()).filter(|s| !s.is_empty()))
        .unwrap_or("(untitled)");
    let mut rows = vec![format!("{idx}) {title}")];

    if is_usgs(ev) {
        let (mag, depth) = earthquake_values(ev);
        rows.push(format!(
            "Origin: {}   Updated: {}",
            fmt_time(attr_time(ev, "time"), tz),
            fmt_time(attr_time(ev, "updated"), tz)
        ));
        let mut magdepth = match mag {
            Some(m) => format!("Magnitude: {m:.1}"),
            None => format!("Magnitude: {DASH}"),
        };
        if let Some(d) = depth {
            magdepth.push_str(&format!(" • Depth: {d:.1} km"));
        }
        rows.push(magdepth);
        rows.push(format!("Alert: {} • Tsunami: {}", usgs_alert(ev), tsunami(ev)));
    } else {
        let meta = [ev.str_attr("senderName"), ev.str_attr("areaDesc")]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" — ");
        if !meta.is_empty() {
            rows.push(meta);
        }
        let expires = first_time(ev, &["expires", "ends"]);
        rows.push(
            format!(
                "When: {} → {}  {}",
                fmt_time(first_time(ev, &["onset", "effective", "sent"]), tz),
                fmt_time(expires, tz),
                time_left(expires, now)
            )
            .trim_end()
            .to_string(),
        );
        rows.push(format!(
            "Severity: {} • Certainty: {} • Urgency: {}",
            or_dash(ev.severity.as_deref()),
            or_dash(ev.str_attr("certainty")),
            or_dash(ev.str_attr("urgency"))
        ));
    }
    rows.push(format!("URL: {}", link_or_id(ev)));
    if let Some(w) = wkt {
        rows.push(format!("WKT: {}", trim_wkt(w)));
    }

    let mut out = rows.remove(0);
    for r in rows {
        out.push_str("\n   ");
        out.push_str(&r);
    }
    out
}

/// Plaintext body: duplicates collapsed, most severe first.
fn text_body(events: &[Event], wkts: &[Option<String>], now: DateTime<Utc>, tz: Tz) -> String {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut uniq: Vec<(&Event, Option<&str>)> = Vec::new();
    for (i, ev) in events.iter().enumerate() {
        let wkt = wkts.get(i).and_then(|w| w.as_deref());
        let key = block_key(ev);
        match seen.get(&key).copied() {
            // Later re-issues replace the earlier one in place.
            Some(slot) => uniq[slot] = (ev, wkt),
            None => {
                seen.insert(key, uniq.len());
                uniq.push((ev, wkt));
            }
        }
    }
    uniq.sort_by(|(a, _), (b, _)| {
        let rank = severity_rank(b.severity.as_deref()).cmp(&severity_rank(a.severity.as_deref()));
        rank.then_with(|| match (sort_time(a), sort_time(b)) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        })
    });

    uniq.iter()
        .enumerate()
        .map(|(i, (ev, wkt))| text_block(i + 1, ev, *wkt, now, tz))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn cell(v: &str) -> String {
    let v = v.trim();
    if v.is_empty() {
        "&nbsp;".to_string()
    } else {
        encode_text(v).into_owned()
    }
}

fn html_rows(events: &[Event], wkts: &[Option<String>], tz: Tz) -> String {
    let mut rows = Vec::new();
    for (i, ev) in events.iter().enumerate() {
        let title = Some(ev.title.trim()).filter(|s| !s.is_empty()).unwrap_or("(untitled)");
        let provider = if ev.source.trim().is_empty() {
            "UNKNOWN".to_string()
        } else {
            ev.source.trim().to_uppercase()
        };
        let link = ev.link.as_deref().map(str::trim).unwrap_or_default();
        let link_html = if link.is_empty() {
            String::new()
        } else {
            format!("<a href=\"{}\">link</a>", encode_double_quoted_attribute(link))
        };
        rows.push(format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td><code>{}</code></td></tr>",
            encode_text(&provider),
            encode_text(title),
            cell(ev.severity.as_deref().unwrap_or_default()),
            cell(ev.updated.as_deref().unwrap_or_default()),
            link_html,
            encode_text(ev.id.trim()),
        ));

        if is_usgs(ev) {
            let (mag, depth) = earthquake_values(ev);
            let parts = [
                format!("Origin: {}", fmt_time(attr_time(ev, "time"), tz)),
                mag.map_or_else(|| format!("Magnitude: {DASH}"), |m| format!("Magnitude: {m:.1}")),
                depth.map_or_else(|| format!("Depth: {DASH}"), |d| format!("Depth: {d:.1} km")),
                format!("Alert: {}", encode_text(&usgs_alert(ev))),
                format!("Tsunami: {}", tsunami(ev)),
            ];
            rows.push(format!(
                "<tr><td colspan='6' style='font-family:system-ui,Segoe UI,Arial;font-size:12px;'>{}</td></tr>",
                parts.join(" • ")
            ));
        }

        if let Some(w) = wkts.get(i).and_then(|w| w.as_deref()) {
            rows.push(format!(
                "<tr><td colspan='6' style='font-family:monospace;font-size:12px;white-space:nowrap;overflow:auto;'>\
                 <strong>WKT:</strong> {}</td></tr>",
                encode_text(&trim_wkt(w))
            ));
        }
    }
    rows.join("\n")
}

/// Subject, plaintext and HTML for one group. `wkts` is aligned with
/// `events`; missing entries mean no WKT line. Event times are shown in `tz`.
pub fn compose_message(
    group: &str,
    events: &[Event],
    wkts: &[Option<String>],
    now: DateTime<Utc>,
    tz: Tz,
) -> ComposedMessage {
    let subject = subject_for_group(group, events);
    let generated_at = now.format("%Y-%m-%dT%H:%M:%SZ").to_string();

    let text = format!(
        "{subject}\n\n{}\n\nGenerated at {generated_at} for group '{group}'.\n",
        text_body(events, wkts, now, tz)
    );

    let html = format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title></head><body>\n\
         <h2>{title}</h2>\n\
         <table border='1' cellpadding='6' cellspacing='0' style='border-collapse:collapse;'>\
         <thead><tr><th>Provider</th><th>Title</th><th>Severity</th><th>Updated</th><th>Link</th><th>ID</th></tr></thead>\
         <tbody>{rows}</tbody></table>\n\
         <p style='font-size:11px;color:#666;'>Generated at {generated_at} for group '{group_html}'.</p>\n\
         </body></html>\n",
        title = encode_text(&subject),
        rows = html_rows(events, wkts, tz),
        group_html = encode_text(group),
    );

    ComposedMessage { subject, text, html }
}
