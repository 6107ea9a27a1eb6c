//! Session lifecycle: periodic refresh loops and plain transfers.

use std::sync::Arc;
use std::time::Duration;

use tessera_nullables::{Call, NullAuthority};
use tessera_types::{Amount, WalletAddress};
use tessera_wallet_core::{
    Authorization, ClientConfig, ErrorKind, Identity, LedgerAuthority, MinedBlock, MiningOutcome,
    MiningRequest, Verification, VerificationRequest, WalletSession,
};

fn alice() -> WalletAddress {
    WalletAddress::new("alice")
}

fn session(authority: &Arc<NullAuthority>, identity: Identity) -> WalletSession {
    let dyn_authority: Arc<dyn LedgerAuthority> = authority.clone();
    WalletSession::new(dyn_authority, identity, &ClientConfig::default())
}

fn signing() -> Identity {
    Identity::with_authorization(alice(), Authorization::new("alice-key"))
}

// ---------------------------------------------------------------------------
// 1. Refresh loops
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn loops_tick_on_their_periods() {
    let authority = Arc::new(NullAuthority::new());
    authority.set_balance(&alice(), Amount::from_units(7));
    let mut session = session(&authority, Identity::watch_only(alice()));

    session.start();
    assert!(session.is_running());
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(authority.calls(Call::Balance), 1);
    assert_eq!(authority.calls(Call::Chain), 1);
    assert_eq!(authority.calls(Call::ListAgreements), 1);
    assert_eq!(authority.calls(Call::Mempool), 1);
    assert_eq!(session.balance().current().await, Some(Amount::from_units(7)));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(authority.calls(Call::Balance), 2);
    assert_eq!(authority.calls(Call::Mempool), 3);
}

#[tokio::test(start_paused = true)]
async fn start_twice_spawns_once() {
    let authority = Arc::new(NullAuthority::new());
    let mut session = session(&authority, Identity::watch_only(alice()));
    session.start();
    session.start();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(authority.calls(Call::Balance), 1);
    assert_eq!(authority.calls(Call::Mempool), 1);
}

#[tokio::test(start_paused = true)]
async fn logout_stops_every_loop() {
    let authority = Arc::new(NullAuthority::new());
    let mut session = session(&authority, Identity::watch_only(alice()));
    session.start();
    tokio::time::sleep(Duration::from_secs(1)).await;

    session.logout().await;
    let before = authority.total_calls();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(authority.total_calls(), before);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_session_stops_its_loops() {
    let authority = Arc::new(NullAuthority::new());
    let mut session = session(&authority, Identity::watch_only(alice()));
    session.start();
    tokio::time::sleep(Duration::from_secs(1)).await;

    drop(session);
    let before = authority.total_calls();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(authority.total_calls(), before);
}

#[tokio::test(start_paused = true)]
async fn failing_refresh_keeps_the_loop_alive() {
    let authority = Arc::new(NullAuthority::new());
    authority.fail_next(
        Call::Mempool,
        tessera_wallet_core::AuthorityError::Transport("unreachable".into()),
    );
    let mut session = session(&authority, Identity::watch_only(alice()));
    session.start();

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(authority.calls(Call::Mempool), 2);
    assert!(session.mempool().snapshot().await.is_some());
    assert!(session.is_running());
}

// ---------------------------------------------------------------------------
// 2. Transfers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_queues_transfer_and_refreshes_mempool() {
    let authority = Arc::new(NullAuthority::new());
    authority.set_balance(&alice(), Amount::from_units(10));
    let session = session(&authority, signing());

    session
        .send(&WalletAddress::new("bob"), Amount::from_units(3), "0.5".parse().unwrap())
        .await
        .unwrap();

    assert_eq!(authority.pending().len(), 1);
    assert_eq!(authority.calls(Call::Mempool), 1);
    let snapshot = session.mempool().snapshot().await.unwrap();
    assert_eq!(snapshot.transactions[0].recipient, WalletAddress::new("bob"));
}

#[tokio::test]
async fn send_validates_before_any_request() {
    let authority = Arc::new(NullAuthority::new());
    let watch_only = session(&authority, Identity::watch_only(alice()));
    let signer = session(&authority, signing());

    let cases = [
        (&watch_only, WalletAddress::new("bob"), Amount::from_units(1)),
        (&signer, WalletAddress::new(""), Amount::from_units(1)),
        (&signer, WalletAddress::new("bob"), Amount::ZERO),
    ];
    for (session, recipient, amount) in cases {
        let err = session
            .send(&recipient, amount, Amount::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
    assert_eq!(authority.total_calls(), 0);
}

#[tokio::test]
async fn insufficient_funds_is_the_authority_reason() {
    let authority = Arc::new(NullAuthority::new());
    let session = session(&authority, signing());

    let err = session
        .send(&WalletAddress::new("bob"), Amount::from_units(1), Amount::ZERO)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Rejection);
    assert_eq!(err.to_string(), "Insufficient funds");
    assert_eq!(authority.calls(Call::Mempool), 0);
}

// ---------------------------------------------------------------------------
// 3. Verification
// ---------------------------------------------------------------------------

#[tokio::test]
async fn mined_transfer_verifies_with_its_signature() {
    let authority = Arc::new(NullAuthority::new());
    authority.set_balance(&alice(), Amount::from_units(10));
    let session = session(&authority, signing());
    session
        .send(&WalletAddress::new("bob"), Amount::from_units(3), Amount::ZERO)
        .await
        .unwrap();
    let signature = authority.pending()[0].signature.clone().unwrap();

    authority.set_mining_outcome(Ok(MiningOutcome::Mined(MinedBlock {
        index: None,
        nonce: 1,
        hash: "00aa".into(),
    })));
    let request = MiningRequest {
        miner_address: WalletAddress::new("miner"),
        selected_indices: vec![0],
    };
    authority.submit_mining_job(&request).await.unwrap();

    let claim = |signature: &str| {
        VerificationRequest::transfer(
            0,
            alice(),
            WalletAddress::new("bob"),
            Amount::from_units(3),
            Amount::ZERO,
            signature,
            "pub-alice",
        )
    };
    let chain = session.chain();
    assert_eq!(chain.verify(&claim(&signature)).await.unwrap(), Verification::Valid);
    assert_eq!(chain.verify(&claim("tampered")).await.unwrap(), Verification::Invalid);
}

#[tokio::test]
async fn unsigned_claim_is_refused_locally() {
    let authority = Arc::new(NullAuthority::new());
    let session = session(&authority, Identity::watch_only(alice()));
    let request = VerificationRequest::transfer(
        0,
        alice(),
        WalletAddress::new("bob"),
        Amount::from_units(1),
        Amount::ZERO,
        "",
        "pub-alice",
    );
    let err = session.chain().verify(&request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(authority.total_calls(), 0);

    // Contract payouts carry no user signature.
    let payout = VerificationRequest::contract_transfer(
        0,
        WalletAddress::new("bob"),
        Amount::from_units(1),
        Amount::ZERO,
    );
    assert_eq!(
        session.chain().verify(&payout).await.unwrap(),
        Verification::Invalid
    );
    assert_eq!(authority.calls(Call::VerifyTransaction), 1);
}
