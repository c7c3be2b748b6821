/// Percentage of `done` out of `total`, rounded.
///
/// Anything short of the full size is capped at 99, so an item reports 100
/// only once its last byte has moved. Empty transfers are immediately 100.
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 || done >= total {
        return 100;
    }
    let p = (done as f64 / total as f64 * 100.0).round() as u8;
    p.min(99)
}
