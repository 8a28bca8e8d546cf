//! Dynamic table naming from dotted logger names.

/// Table name the dynamic variant journals under.
pub const DYNAMIC_JOURNAL_TABLE: &str = "_dynamic_table_handler_";

/// Derive a table from `logger`.
///
/// The segments following the first `sentinel` segment are joined with
/// `joiner`. Without a sentinel, or with nothing after it, `default_table` is
/// used.
///
/// ```
/// use agentlog::agent_handler::dynamic_table;
///
/// assert_eq!(dynamic_table("shop.td.notification.email", "td", "__", "default"), "notification__email");
/// assert_eq!(dynamic_table("shop.prod", "td", "__", "default"), "default");
/// ```
pub fn dynamic_table(logger: &str, sentinel: &str, joiner: &str, default_table: &str) -> String {
    let segments: Vec<&str> = logger.split('.').collect();
    let start = segments
        .iter()
        .position(|segment| *segment == sentinel)
        .map_or(segments.len(), |index| index + 1);
    let table = segments[start..].join(joiner);
    if table.is_empty() {
        default_table.to_owned()
    } else {
        table
    }
}
