//! Occurrence Generator.
//!
//! Expands one (enrollment start, track, template) triple into the delivery
//! timestamps `start + delay, start + delay + interval, ...` up to and
//! including `start + duration`.

use chrono::{DateTime, Utc};
use pulse_core::{PlannedOccurrence, QuestionTemplate, Track, MAX_WINDOW_DAYS};
use tracing::warn;

/// Ordered delivery timestamps for one template.
///
/// Empty iff `delay > duration`. An interval below one day is clamped to one
/// day so the expansion always terminates; a negative delay is treated as zero.
/// A window beyond [`MAX_WINDOW_DAYS`], or one that leaves the representable
/// time range, yields nothing.
pub fn generate(
    start: DateTime<Utc>,
    track: &Track,
    template: &QuestionTemplate,
) -> Vec<DateTime<Utc>> {
    if template.interval_days < 1 {
        warn!(
            template_id = template.id,
            interval_days = template.interval_days,
            "clamping non-positive interval to 1 day"
        );
    }
    if track.duration_days > MAX_WINDOW_DAYS || template.delay_days > MAX_WINDOW_DAYS {
        warn!(
            track_id = track.id,
            template_id = template.id,
            duration_days = track.duration_days,
            delay_days = template.delay_days,
            "window exceeds {MAX_WINDOW_DAYS} days, generating nothing"
        );
        return Vec::new();
    }
    let interval = chrono::Duration::days(i64::from(template.interval_days.max(1)));
    let delay = chrono::Duration::days(i64::from(template.delay_days.max(0)));

    let (Some(end), Some(first)) = (
        start.checked_add_signed(track.duration()),
        start.checked_add_signed(delay),
    ) else {
        warn!(track_id = track.id, %start, "window end out of range, generating nothing");
        return Vec::new();
    };

    let mut out = Vec::new();
    let mut next = Some(first);
    while let Some(t) = next.filter(|t| *t <= end) {
        out.push(t);
        next = t.checked_add_signed(interval);
    }
    out
}

/// Plan the occurrences of every template of a track.
///
/// Ordered by template as given, then by time.
pub fn plan<'a>(
    start: DateTime<Utc>,
    track: &Track,
    templates: impl IntoIterator<Item = &'a QuestionTemplate>,
) -> Vec<PlannedOccurrence> {
    templates
        .into_iter()
        .flat_map(|template| {
            generate(start, track, template)
                .into_iter()
                .map(move |scheduled_at| PlannedOccurrence {
                    template_id: template.id,
                    scheduled_at,
                })
        })
        .collect()
}

/// Closed-form occurrence count: `floor((duration - delay) / interval) + 1`,
/// or zero when the delay exceeds the duration.
pub fn expected_count(duration_days: i32, delay_days: i32, interval_days: i32) -> usize {
    let delay = delay_days.max(0);
    if delay > duration_days {
        return 0;
    }
    ((duration_days - delay) / interval_days.max(1)) as usize + 1
}
