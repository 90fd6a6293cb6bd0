use super::*;

fn leader(ticket: Ticket<'_>) -> RefreshGuard<'_> {
    match ticket {
        Ticket::Leader(guard) => guard,
        Ticket::Waiter(_) => panic!("expected leader ticket"),
    }
}

fn waiter(ticket: Ticket<'_>) -> oneshot::Receiver<String> {
    match ticket {
        Ticket::Waiter(rx) => rx,
        Ticket::Leader(_) => panic!("expected waiter ticket"),
    }
}

#[test]
fn first_acquire_leads_and_later_ones_wait() {
    let coordinator = RefreshCoordinator::new();
    assert!(!coordinator.is_refreshing());

    let guard = leader(coordinator.acquire());
    assert!(coordinator.is_refreshing());

    let _a = waiter(coordinator.acquire());
    let _b = waiter(coordinator.acquire());
    assert_eq!(coordinator.queued(), 2);

    guard.succeed("t");
}

#[tokio::test]
async fn succeed_delivers_same_token_to_all_waiters() {
    let coordinator = RefreshCoordinator::new();
    let guard = leader(coordinator.acquire());
    let receivers: Vec<_> = (0..4).map(|_| waiter(coordinator.acquire())).collect();

    guard.succeed("fresh-token");

    for rx in receivers {
        assert_eq!(rx.await.unwrap(), "fresh-token");
    }
    assert!(!coordinator.is_refreshing());
    assert_eq!(coordinator.queued(), 0);
}

#[tokio::test]
async fn fail_rejects_all_waiters() {
    let coordinator = RefreshCoordinator::new();
    let guard = leader(coordinator.acquire());
    let a = waiter(coordinator.acquire());
    let b = waiter(coordinator.acquire());

    guard.fail();

    assert!(a.await.is_err());
    assert!(b.await.is_err());
    assert!(!coordinator.is_refreshing());
}

#[tokio::test]
async fn dropping_unsettled_guard_releases_flag_and_rejects() {
    let coordinator = RefreshCoordinator::new();
    let guard = leader(coordinator.acquire());
    let rx = waiter(coordinator.acquire());

    drop(guard);

    assert!(!coordinator.is_refreshing());
    assert!(rx.await.is_err());
}

#[test]
fn next_acquire_after_settle_leads_again() {
    let coordinator = RefreshCoordinator::new();
    leader(coordinator.acquire()).fail();
    let guard = leader(coordinator.acquire());
    guard.succeed("again");
    assert!(!coordinator.is_refreshing());
}

#[test]
fn succeed_skips_waiters_whose_caller_left() {
    let coordinator = RefreshCoordinator::new();
    let guard = leader(coordinator.acquire());
    drop(waiter(coordinator.acquire()));
    let mut kept = waiter(coordinator.acquire());

    guard.succeed("t");

    assert_eq!(kept.try_recv().unwrap(), "t");
}
