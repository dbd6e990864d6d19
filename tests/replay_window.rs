//! Integration-level replay window coverage beyond the unit tests colocated
//! in `wg::session`: a full transport session driven through a realistic
//! out-of-order/duplicate/gap pattern, the kind a real lossy UDP path
//! produces.
use wirecage::wg::session::ReplayWindow;

#[test]
fn reordered_burst_accepts_each_counter_exactly_once() {
    let mut window = ReplayWindow::new();
    let arrival_order = [0u64, 2, 1, 4, 3, 7, 5, 6, 9, 8];

    let mut accepted = Vec::new();
    for counter in arrival_order {
        if window.check_and_update(counter) {
            accepted.push(counter);
        }
    }

    assert_eq!(accepted, arrival_order.to_vec());

    for counter in arrival_order {
        assert!(
            !window.check_and_update(counter),
            "counter {counter} replayed a second time should be rejected"
        );
    }
}

#[test]
fn large_forward_jump_does_not_resurrect_old_counters() {
    let mut window = ReplayWindow::new();
    assert!(window.check_and_update(100));
    assert!(window.check_and_update(100_000));
    // 100 is now far outside the window behind the new high-water mark.
    assert!(!window.check_and_update(100));
}
