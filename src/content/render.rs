//! Widget dock and timeline layout

use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveTime, TimeZone, Timelike};
use serde::Serialize;

use crate::feed::{Deadline, Event};
use crate::settings::ColorPair;

pub const MAX_DOCK_WIDGETS: usize = 5;

pub const WIDGET_ICONS: [&str; 5] = [
    "icons/assignment.svg",
    "icons/quiz.svg",
    "icons/studying.svg",
    "icons/clean.svg",
    "icons/group-discussion.svg",
];

/// Depth tier per dock slot, nearest deadline first
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DepthTier {
    pub translate_y: f32,
    pub scale: f32,
    pub z_index: u8,
}

const fn tier(translate_y: f32, scale: f32, z_index: u8) -> DepthTier {
    DepthTier {
        translate_y,
        scale,
        z_index,
    }
}

pub const DEPTH_TIERS: [DepthTier; MAX_DOCK_WIDGETS] = [
    tier(0.0, 1.3, 5),
    tier(4.0, 1.15, 4),
    tier(8.0, 1.05, 3),
    tier(10.0, 0.95, 2),
    tier(12.0, 0.85, 1),
];

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WidgetLayout {
    pub deadline_id: i64,
    pub title: String,
    pub popup_title: String,
    pub color: String,
    pub border: String,
    pub icon: &'static str,
    pub tier: DepthTier,
    pub upcoming: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub event_id: i64,
    pub title: String,
    pub time_label: String,
    pub left_percent: f64,
    pub width_percent: f64,
    pub label_left_percent: f64,
    pub label_above: bool,
}

/// Pending, widget-eligible deadlines due after `now`, nearest first
pub fn upcoming_deadlines(deadlines: &[Deadline], now: DateTime<Local>) -> Vec<&Deadline> {
    let mut upcoming: Vec<&Deadline> = deadlines
        .iter()
        .filter(|d| !d.completed && d.widget_eligible)
        .filter(|d| d.due_at.is_some_and(|due| due > now))
        .collect();
    upcoming.sort_by_key(|d| d.due_at);
    upcoming.truncate(MAX_DOCK_WIDGETS);
    upcoming
}

pub fn layout_widgets(
    deadlines: &[Deadline],
    palette: &[ColorPair],
    now: DateTime<Local>,
) -> Vec<WidgetLayout> {
    upcoming_deadlines(deadlines, now)
        .into_iter()
        .zip(DEPTH_TIERS)
        .enumerate()
        .map(|(slot, (deadline, tier))| {
            let (color, border) = match palette.get(deadline.color_index % palette.len().max(1)) {
                Some(pair) => (pair.color.clone(), pair.border.clone()),
                None => (String::from("#BDBDBD"), String::from("#a1a1a1")),
            };
            let due = deadline
                .due_at
                .map(|due| due.format("%-m/%-d/%Y, %-I:%M:%S %p").to_string())
                .unwrap_or_default();
            WidgetLayout {
                deadline_id: deadline.id,
                title: deadline.title.clone(),
                popup_title: format!("{} - due {}", deadline.title, due),
                color,
                border,
                icon: WIDGET_ICONS[deadline.icon_index % WIDGET_ICONS.len()],
                tier,
                upcoming: slot == 0,
            }
        })
        .collect()
}

fn start_of_day(now: DateTime<Local>) -> DateTime<Local> {
    let midnight = now.date_naive().and_time(NaiveTime::MIN);
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .unwrap_or(now - ChronoDuration::seconds(i64::from(now.num_seconds_from_midnight())))
}

fn minutes_of_day(t: DateTime<Local>) -> f64 {
    f64::from(t.hour() * 60 + t.minute())
}

fn time_label(t: DateTime<Local>) -> String {
    t.format("%-I:%M %p").to_string()
}

/// Today's events as timeline markers, sorted by start
pub fn layout_timeline(events: &[Event], now: DateTime<Local>) -> Vec<TimelineEntry> {
    let day_start = start_of_day(now);
    let day_end = day_start + ChronoDuration::seconds(86_399);

    let mut today: Vec<(&Event, DateTime<Local>)> = events
        .iter()
        .filter_map(|e| e.start_time.map(|start| (e, start)))
        .filter(|(_, start)| *start >= day_start && *start <= day_end)
        .collect();
    today.sort_by_key(|(_, start)| *start);

    today
        .into_iter()
        .enumerate()
        .map(|(i, (event, start))| {
            let end = event.end_time.unwrap_or(start);
            let left = minutes_of_day(start) / 1440.0 * 100.0;
            let width = minutes_of_day(end) / 1440.0 * 100.0 - left;
            TimelineEntry {
                event_id: event.id,
                title: event.title.clone(),
                time_label: format!("{} - {}", time_label(start), time_label(end)),
                left_percent: left,
                width_percent: width,
                label_left_percent: left + width / 2.0,
                label_above: i % 2 == 0,
            }
        })
        .collect()
}

/// Position of the current-time marker along the day
pub fn current_time_percent(now: DateTime<Local>) -> f64 {
    f64::from(now.num_seconds_from_midnight()) / 86_400.0 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::default_widget_palette;
    use serde_json::Value;

    fn at(h: u32, m: u32) -> DateTime<Local> {
        let naive = chrono::NaiveDate::from_ymd_opt(2026, 3, 10)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap();
        Local.from_local_datetime(&naive).earliest().unwrap()
    }

    fn deadline(id: i64, due: Option<DateTime<Local>>) -> Deadline {
        Deadline {
            id,
            title: format!("Task {id}"),
            due_at: due,
            completed: false,
            color_index: id as usize,
            icon_index: id as usize,
            widget_eligible: true,
            raw: Value::Null,
        }
    }

    fn event(id: i64, start: DateTime<Local>, end: DateTime<Local>) -> Event {
        Event {
            id,
            title: format!("Event {id}"),
            start_time: Some(start),
            end_time: Some(end),
        }
    }

    #[test]
    fn test_dock_takes_five_nearest_pending() {
        let now = at(9, 0);
        let mut deadlines: Vec<Deadline> = (1..=8)
            .map(|i| deadline(i, Some(now + ChronoDuration::hours(9 - i))))
            .collect();
        deadlines[7].completed = true; // id 8, the nearest
        deadlines[6].widget_eligible = false; // id 7
        deadlines.push(deadline(20, Some(now - ChronoDuration::hours(1))));
        deadlines.push(deadline(21, None));

        let widgets = layout_widgets(&deadlines, &default_widget_palette(), now);
        let ids: Vec<i64> = widgets.iter().map(|w| w.deadline_id).collect();
        assert_eq!(ids, vec![6, 5, 4, 3, 2]);
        assert!(widgets[0].upcoming);
        assert!(widgets[1..].iter().all(|w| !w.upcoming));
        assert_eq!(widgets[0].tier, DEPTH_TIERS[0]);
        assert_eq!(widgets[4].tier.scale, 0.85);
    }

    #[test]
    fn test_palette_and_icon_wrap() {
        let now = at(9, 0);
        let mut d = deadline(1, Some(at(17, 30)));
        d.color_index = 12;
        d.icon_index = 7;
        let palette = default_widget_palette();

        let widget = &layout_widgets(&[d], &palette, now)[0];
        assert_eq!(widget.color, palette[2].color);
        assert_eq!(widget.border, palette[2].border);
        assert_eq!(widget.icon, WIDGET_ICONS[2]);
        assert_eq!(widget.popup_title, "Task 1 - due 3/10/2026, 5:30:00 PM");
    }

    #[test]
    fn test_empty_palette_falls_back() {
        let widget = &layout_widgets(&[deadline(1, Some(at(12, 0)))], &[], at(9, 0))[0];
        assert!(!widget.color.is_empty());
    }

    #[test]
    fn test_timeline_positions_and_labels() {
        let now = at(12, 0);
        let events = vec![
            event(2, at(18, 0), at(19, 30)),
            event(1, at(6, 0), at(7, 0)),
            event(3, at(6, 0) + ChronoDuration::days(1), at(7, 0) + ChronoDuration::days(1)),
        ];

        let entries = layout_timeline(&events, now);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event_id, 1);
        assert!((entries[0].left_percent - 25.0).abs() < 1e-9);
        assert!((entries[0].width_percent - 60.0 / 1440.0 * 100.0).abs() < 1e-9);
        assert!(entries[0].label_above);
        assert!(!entries[1].label_above);
        assert_eq!(entries[0].time_label, "6:00 AM - 7:00 AM");
        assert_eq!(entries[1].time_label, "6:00 PM - 7:30 PM");
    }

    #[test]
    fn test_current_time_marker() {
        assert!((current_time_percent(at(12, 0)) - 50.0).abs() < 1e-9);
        assert_eq!(current_time_percent(at(0, 0)), 0.0);
    }
}
