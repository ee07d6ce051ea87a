/// Renders a view count coarsely: keep the leading 3 digits from 100,000 up,
/// 2 digits from 1,000 up, otherwise 1 digit, then zero the rest and group by
/// thousands. Truncates, never rounds up.
pub fn format_views(views: u64) -> String {
    group_thousands(truncate_views(views))
}

pub fn truncate_views(views: u64) -> u64 {
    let digits = views.to_string().len() as u32;
    let keep = if digits >= 6 {
        3
    } else if digits >= 4 {
        2
    } else {
        1
    };
    let scale = 10u64.pow(digits.saturating_sub(keep));
    views / scale * scale
}

pub fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut output = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            output.push(',');
        }
        output.push(ch);
    }
    output
}

/// Parses a count written with optional `,` grouping. `None` when no digits remain.
pub fn parse_views(text: &str) -> Option<u64> {
    let digits = text.replace(',', "");
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}
