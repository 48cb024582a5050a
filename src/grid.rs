use crate::config::SlotGridConfig;

const MINUTES_PER_HOUR: u32 = 60;

/// Canonical `HH:MM` times for a business day, strictly ascending.
///
/// Total over its input: a zero duration or an empty window yields no slots.
/// A slot that would straddle the break start is skipped and the cursor jumps
/// to the break end; generation stops once a slot would end after `end_hour`.
pub fn generate_daily_slots(config: &SlotGridConfig) -> Vec<String> {
    let step = config.slot_duration_minutes;
    if step == 0 {
        return Vec::new();
    }
    let day_end = config.end_hour * MINUTES_PER_HOUR;
    let break_window = config.has_break().then(|| {
        (
            config.break_start_hour * MINUTES_PER_HOUR,
            config.break_end_hour * MINUTES_PER_HOUR,
        )
    });

    let mut slots = Vec::new();
    let mut cursor = config.start_hour * MINUTES_PER_HOUR;
    loop {
        if let Some((break_start, break_end)) = break_window {
            if cursor >= break_start && cursor < break_end {
                cursor = break_end;
            } else if cursor < break_start
                && cursor.checked_add(step).is_none_or(|end| end > break_start)
            {
                cursor = break_end;
                continue;
            }
        }
        match cursor.checked_add(step) {
            Some(slot_end) if slot_end <= day_end => {
                slots.push(format_hhmm(cursor));
                cursor = slot_end;
            }
            _ => break,
        }
    }
    slots
}

fn format_hhmm(minutes: u32) -> String {
    format!("{:02}:{:02}", minutes / MINUTES_PER_HOUR, minutes % MINUTES_PER_HOUR)
}

/// `"13:30"` → `"1:30 PM"`. Unparseable input is echoed back.
pub fn display_label(time: &str) -> String {
    let Some((h, m)) = time.split_once(':') else {
        return time.to_string();
    };
    let (Ok(hour), Ok(minute)) = (h.parse::<u32>(), m.parse::<u32>()) else {
        return time.to_string();
    };
    let suffix = if hour % 24 < 12 { "AM" } else { "PM" };
    let hour12 = match hour % 12 {
        0 => 12,
        h => h,
    };
    format!("{hour12}:{minute:02} {suffix}")
}
