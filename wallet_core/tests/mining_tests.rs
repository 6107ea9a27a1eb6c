//! Mining orchestration tests on a paused clock: submission guards, progress
//! reconciliation, completion side effects and failure handling.

use std::sync::Arc;
use std::time::Duration;

use tessera_nullables::{Call, NullAuthority};
use tessera_types::{Amount, WalletAddress};
use tessera_wallet_core::{
    AuthorityError, BalanceView, ErrorKind, FailureOrigin, LedgerAuthority, MempoolView,
    MinedBlock, MiningConfig, MiningOrchestrator, MiningOutcome, MiningStatus,
    PendingTransaction, ProgressReport, Toggle, WalletError,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const FINAL_HASH: &str = "0000abc9f1e2";

fn miner() -> WalletAddress {
    WalletAddress::new("miner")
}

fn pending(sender: &str, fee: &str) -> PendingTransaction {
    PendingTransaction {
        sender: WalletAddress::new(sender),
        recipient: WalletAddress::new("shop"),
        amount: Amount::from_units(1),
        fee: fee.parse().unwrap(),
        timestamp: None,
        kind: Some("normal".into()),
        signature: Some("VALID".into()),
    }
}

struct Rig {
    authority: Arc<NullAuthority>,
    mempool: Arc<MempoolView>,
    balance: Arc<BalanceView>,
    mining: MiningOrchestrator,
}

async fn rig(config: MiningConfig) -> Rig {
    let authority = Arc::new(NullAuthority::new());
    authority.set_block_reward(Amount::from_units(10));
    authority.push_pending(pending("a", "0.5"));
    authority.push_pending(pending("b", "2"));
    authority.push_pending(pending("c", "1.0"));

    let dyn_authority: Arc<dyn LedgerAuthority> = authority.clone();
    let mempool = Arc::new(MempoolView::new(dyn_authority.clone()));
    let balance = Arc::new(BalanceView::new(dyn_authority.clone(), miner()));
    let mining = MiningOrchestrator::new(dyn_authority, mempool.clone(), balance.clone(), config);

    mempool.refresh().await.unwrap();
    authority.reset_calls();
    Rig {
        authority,
        mempool,
        balance,
        mining,
    }
}

fn fast_poll() -> MiningConfig {
    MiningConfig {
        poll_interval: Duration::from_secs(1),
        max_poll_failures: 1,
    }
}

fn rank(status: MiningStatus) -> u8 {
    match status {
        MiningStatus::NotStarted => 0,
        MiningStatus::Starting => 1,
        MiningStatus::Mining => 2,
        MiningStatus::Completed | MiningStatus::Error => 3,
    }
}

// ---------------------------------------------------------------------------
// 1. Selection feeding the job
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn reward_preview_adds_selected_fees() {
    let rig = rig(fast_poll()).await;
    assert_eq!(rig.mempool.toggle(0).await, Toggle::Selected);
    assert_eq!(rig.mempool.toggle(2).await, Toggle::Selected);
    assert_eq!(rig.mempool.total_reward().await.to_string(), "11.5");

    assert_eq!(rig.mempool.toggle(2).await, Toggle::Deselected);
    assert_eq!(rig.mempool.total_reward().await.to_string(), "10.5");
}

#[tokio::test(start_paused = true)]
async fn out_of_range_toggle_is_ignored() {
    let rig = rig(fast_poll()).await;
    assert_eq!(rig.mempool.toggle(3).await, Toggle::Ignored);
    assert!(rig.mempool.selected().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn changed_mempool_clears_selection() {
    let rig = rig(fast_poll()).await;
    rig.mempool.toggle(1).await;

    // Same contents: selection survives.
    rig.mempool.refresh().await.unwrap();
    assert_eq!(rig.mempool.selected().await, vec![1]);

    rig.authority.push_pending(pending("d", "0.1"));
    rig.mempool.refresh().await.unwrap();
    assert!(rig.mempool.selected().await.is_empty());
}

// ---------------------------------------------------------------------------
// 2. Polled completion
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn polled_completion_stops_polling_and_refreshes_once() {
    let rig = rig(fast_poll()).await;
    rig.mempool.toggle(0).await;
    rig.mempool.toggle(2).await;
    rig.authority.script_progress([
        ProgressReport::mining(42, "7f3a"),
        ProgressReport::completed(57, FINAL_HASH),
    ]);

    let submitted = rig.mining.submit_selected(&miner()).await.unwrap();
    assert_eq!(submitted.status, MiningStatus::Starting);
    assert_eq!(submitted.selected_transaction_indices, vec![0, 2]);

    let job = rig.mining.wait_for_terminal().await;
    assert_eq!(job.status, MiningStatus::Completed);
    assert_eq!(job.final_nonce, Some(57));
    assert_eq!(job.final_hash.as_deref(), Some(FINAL_HASH));
    assert_eq!(rig.authority.calls(Call::MiningProgress), 2);
    assert_eq!(rig.authority.calls(Call::Mempool), 1);
    assert_eq!(rig.authority.calls(Call::Balance), 1);

    // Selection cleared; views show the forged block's effects.
    assert!(rig.mempool.selected().await.is_empty());
    assert_eq!(rig.mempool.snapshot().await.unwrap().len(), 1);
    assert_eq!(rig.balance.current().await.unwrap().to_string(), "11.5");

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(rig.authority.calls(Call::MiningProgress), 2, "polling stopped");
    assert_eq!(rig.mining.job().final_nonce, Some(57));
}

#[tokio::test(start_paused = true)]
async fn published_states_never_move_backwards() {
    let rig = rig(fast_poll()).await;
    rig.authority.script_progress([
        ProgressReport::mining(1, "aa"),
        ProgressReport::with_status(MiningStatus::Starting),
        ProgressReport::mining(2, "bb"),
        ProgressReport::with_status(MiningStatus::NotStarted),
        ProgressReport::completed(3, FINAL_HASH),
        ProgressReport::mining(4, "late"),
    ]);

    let mut rx = rig.mining.subscribe();
    let observer = tokio::spawn(async move {
        let mut seen = vec![rx.borrow_and_update().status];
        while rx.changed().await.is_ok() {
            let status = rx.borrow_and_update().status;
            seen.push(status);
            if status.is_terminal() {
                break;
            }
        }
        seen
    });

    rig.mining.submit(&miner(), &[1]).await.unwrap();
    let job = rig.mining.wait_for_terminal().await;
    assert_eq!(job.status, MiningStatus::Completed);
    assert_eq!(job.nonce, Some(3));

    let seen = observer.await.unwrap();
    assert!(seen.windows(2).all(|w| rank(w[0]) <= rank(w[1])), "{seen:?}");
}

// ---------------------------------------------------------------------------
// 3. Synchronous completion
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn mined_response_completes_without_polling() {
    let rig = rig(fast_poll()).await;
    rig.authority.set_mining_outcome(Ok(MiningOutcome::Mined(MinedBlock {
        index: None,
        nonce: 57,
        hash: FINAL_HASH.into(),
    })));
    rig.mempool.toggle(1).await;

    let job = rig.mining.submit(&miner(), &[1]).await.unwrap();
    assert_eq!(job.status, MiningStatus::Completed);
    assert_eq!(job.final_nonce, Some(57));
    assert_eq!(rig.authority.calls(Call::Mempool), 1);
    assert_eq!(rig.authority.calls(Call::Balance), 1);
    assert!(rig.mempool.selected().await.is_empty());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(rig.authority.calls(Call::MiningProgress), 0);
    assert_eq!(rig.authority.chain_height(), 1);
}

// ---------------------------------------------------------------------------
// 4. Submission guards
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn second_submission_while_mining_is_rejected_locally() {
    let rig = rig(fast_poll()).await;
    let gate = rig.authority.hold(Call::SubmitMiningJob);

    let mining = rig.mining.clone();
    let first = tokio::spawn(async move { mining.submit(&miner(), &[0]).await });

    let mut rx = rig.mining.subscribe();
    rx.wait_for(|job| job.status == MiningStatus::Starting)
        .await
        .unwrap();

    let err = rig.mining.submit(&miner(), &[1]).await.unwrap_err();
    assert!(matches!(err, WalletError::JobInProgress(MiningStatus::Starting)));
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(rig.authority.calls(Call::SubmitMiningJob), 1);

    let err = rig.mining.reset().await.unwrap_err();
    assert!(matches!(err, WalletError::ResetNotAllowed(_)));

    gate.notify_one();
    first.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn invalid_submissions_make_no_request() {
    let rig = rig(fast_poll()).await;
    for (address, selected) in [
        (WalletAddress::new(""), vec![0]),
        (miner(), vec![]),
        (miner(), vec![0, 1, 2, 3]),
    ] {
        let err = rig.mining.submit(&address, &selected).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
    assert_eq!(rig.authority.total_calls(), 0);
    assert_eq!(rig.mining.job().status, MiningStatus::NotStarted);
}

// ---------------------------------------------------------------------------
// 5. Failures
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn authority_reported_error_ends_the_job() {
    let rig = rig(fast_poll()).await;
    rig.authority
        .script_progress([ProgressReport::failed("Not enough valid transactions")]);

    rig.mining.submit(&miner(), &[0]).await.unwrap();
    let job = rig.mining.wait_for_terminal().await;
    let error = job.error.expect("error recorded");
    assert_eq!(error.origin, FailureOrigin::Authority);
    assert_eq!(error.message, "Not enough valid transactions");
    assert_eq!(rig.authority.calls(Call::Balance), 0);
}

#[tokio::test(start_paused = true)]
async fn unreachable_progress_fails_the_job_locally() {
    let rig = rig(fast_poll()).await;
    rig.authority.fail_always(
        Call::MiningProgress,
        AuthorityError::Transport("connection reset".into()),
    );

    rig.mining.submit(&miner(), &[0]).await.unwrap();
    let job = rig.mining.wait_for_terminal().await;
    assert_eq!(job.status, MiningStatus::Error);
    assert_eq!(job.error.unwrap().origin, FailureOrigin::Local);
    assert_eq!(rig.authority.calls(Call::MiningProgress), 1);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(rig.authority.calls(Call::MiningProgress), 1, "polling stopped");
}

#[tokio::test(start_paused = true)]
async fn tolerated_poll_failures_recover() {
    let rig = rig(MiningConfig {
        poll_interval: Duration::from_secs(1),
        max_poll_failures: 3,
    })
    .await;
    let outage = AuthorityError::Transport("timeout".into());
    rig.authority.fail_next(Call::MiningProgress, outage.clone());
    rig.authority.fail_next(Call::MiningProgress, outage);
    rig.authority
        .script_progress([ProgressReport::completed(9, FINAL_HASH)]);

    rig.mining.submit(&miner(), &[0]).await.unwrap();
    let job = rig.mining.wait_for_terminal().await;
    assert_eq!(job.status, MiningStatus::Completed);
    assert_eq!(rig.authority.calls(Call::MiningProgress), 3);
}

#[tokio::test(start_paused = true)]
async fn rejected_submission_is_attributed_to_authority() {
    let rig = rig(fast_poll()).await;
    rig.authority
        .set_mining_outcome(Err(AuthorityError::Rejected("Mining failed: empty block".into())));

    let err = rig.mining.submit(&miner(), &[0]).await.unwrap_err();
    assert_eq!(err.to_string(), "Mining failed: empty block");
    let job = rig.mining.job();
    assert_eq!(job.status, MiningStatus::Error);
    assert_eq!(job.error.unwrap().origin, FailureOrigin::Authority);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(rig.authority.calls(Call::MiningProgress), 0);
}

#[tokio::test(start_paused = true)]
async fn unreachable_submission_is_a_local_error() {
    let rig = rig(fast_poll()).await;
    rig.authority.fail_next(
        Call::SubmitMiningJob,
        AuthorityError::Transport("connection refused".into()),
    );

    let err = rig.mining.submit(&miner(), &[0]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(rig.mining.job().error.unwrap().origin, FailureOrigin::Local);
}

// ---------------------------------------------------------------------------
// 6. Reset
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn reset_after_completion_allows_a_new_job() {
    let rig = rig(fast_poll()).await;
    rig.mining.reset().await.unwrap();

    rig.authority
        .script_progress([ProgressReport::completed(5, FINAL_HASH)]);
    rig.mining.submit(&miner(), &[0]).await.unwrap();
    let first = rig.mining.wait_for_terminal().await;

    rig.mempool.refresh().await.unwrap();
    rig.mempool.toggle(0).await;
    rig.mining.reset().await.unwrap();
    let idle = rig.mining.job();
    assert_eq!(idle.status, MiningStatus::NotStarted);
    assert_eq!(idle.final_hash, None);
    assert!(rig.mempool.selected().await.is_empty());

    rig.authority
        .script_progress([ProgressReport::completed(8, "0000ffee")]);
    rig.mining.submit(&miner(), &[0]).await.unwrap();
    let second = rig.mining.wait_for_terminal().await;
    assert_eq!(second.generation, first.generation + 1);
    assert_eq!(second.final_hash.as_deref(), Some("0000ffee"));
}

// ---------------------------------------------------------------------------
// 7. Completion racing the mining request
// ---------------------------------------------------------------------------

/// Let the poll observe completion while the mining request is still held
/// and the post-completion mempool read is parked.
fn complete_by_poll_first(rig: &Rig) -> (Arc<tokio::sync::Notify>, Arc<tokio::sync::Notify>) {
    let mining_gate = rig.authority.hold(Call::SubmitMiningJob);
    let mempool_gate = rig.authority.hold(Call::Mempool);
    rig.authority
        .script_progress([ProgressReport::completed(57, FINAL_HASH)]);
    (mining_gate, mempool_gate)
}

async fn until_completed(mining: &MiningOrchestrator) {
    while mining.job().status != MiningStatus::Completed {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test(start_paused = true)]
async fn late_mined_response_refreshes_once() {
    let rig = rig(fast_poll()).await;
    let (mining_gate, mempool_gate) = complete_by_poll_first(&rig);
    rig.authority.set_mining_outcome(Ok(MiningOutcome::Mined(MinedBlock {
        index: None,
        nonce: 57,
        hash: FINAL_HASH.into(),
    })));

    let mining = rig.mining.clone();
    let submit = tokio::spawn(async move { mining.submit(&miner(), &[0]).await });
    until_completed(&rig.mining).await;

    mining_gate.notify_one();
    let job = submit.await.unwrap().unwrap();
    assert_eq!(job.status, MiningStatus::Completed);

    mempool_gate.notify_one();
    let job = rig.mining.wait_for_terminal().await;
    assert_eq!(job.status, MiningStatus::Completed);
    assert_eq!(rig.authority.calls(Call::Mempool), 1);
    assert_eq!(rig.authority.calls(Call::Balance), 1);
    assert_eq!(rig.authority.chain_height(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_mining_request_after_completion_keeps_the_result() {
    let rig = rig(fast_poll()).await;
    let (mining_gate, mempool_gate) = complete_by_poll_first(&rig);
    rig.authority
        .set_mining_outcome(Err(AuthorityError::Transport("timed out".into())));

    let mining = rig.mining.clone();
    let submit = tokio::spawn(async move { mining.submit(&miner(), &[0]).await });
    until_completed(&rig.mining).await;

    mining_gate.notify_one();
    let job = submit.await.unwrap().unwrap();
    assert_eq!(job.status, MiningStatus::Completed);
    assert_eq!(job.final_nonce, Some(57));

    mempool_gate.notify_one();
    let job = rig.mining.wait_for_terminal().await;
    assert_eq!(job.status, MiningStatus::Completed);
    assert!(job.error.is_none());
    assert_eq!(rig.authority.calls(Call::Mempool), 1);
    assert_eq!(rig.authority.calls(Call::Balance), 1);
    assert_eq!(rig.balance.current().await.unwrap().to_string(), "10.5");
}

#[tokio::test(start_paused = true)]
async fn reset_does_not_cut_completion_refreshes_short() {
    let rig = rig(fast_poll()).await;
    let mempool_gate = rig.authority.hold(Call::Mempool);
    rig.authority
        .script_progress([ProgressReport::completed(57, FINAL_HASH)]);

    rig.mining.submit(&miner(), &[0]).await.unwrap();
    until_completed(&rig.mining).await;
    rig.mining.reset().await.unwrap();

    mempool_gate.notify_one();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(rig.authority.calls(Call::Mempool), 1);
    assert_eq!(rig.authority.calls(Call::Balance), 1);
}
