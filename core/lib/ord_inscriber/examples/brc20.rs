use anyhow::{Context, Result};
use ord_config::InscriberConfig;
use ord_env_config::FromEnv;
use ord_inscriber::{
    client::create_indexer,
    inscriber::{address_type::OutputType, Inscriber},
    signer::KeyManager,
    traits::BitcoinSigner,
    types::{InscriptionConfig, InscriptionRequest, InscriptionState, SessionSnapshot},
};
use tokio::sync::watch;

const BRC20_CONTENT_TYPE: &str = "text/plain;charset=utf-8";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    // export ORD_INSCRIBER_NETWORK="testnet"
    // export ORD_INSCRIBER_INDEXER="esplora"
    // export ORD_INSCRIBER_POLL_INTERVAL=30000
    // export ORD_INSCRIBER_FEE_RATE=3
    //
    // export ORD_SENDER_WIF=example_wif
    // export ORD_SENDER_ADDRESS=tb1q...
    // export ORD_RECIPIENT=tb1p...
    // export ORD_TICKER=ordi
    // export ORD_MINTS=2
    //
    // Set ORD_SNAPSHOT to the JSON printed by an earlier run to resume it.

    let settings = InscriberConfig::from_env().context("Failed to load inscriber config")?;
    let network = settings.network();

    let wif = std::env::var("ORD_SENDER_WIF").context("ORD_SENDER_WIF not set")?;
    let sender_address =
        std::env::var("ORD_SENDER_ADDRESS").context("ORD_SENDER_ADDRESS not set")?;
    let recipient = std::env::var("ORD_RECIPIENT").context("ORD_RECIPIENT not set")?;
    let ticker = std::env::var("ORD_TICKER").unwrap_or_else(|_| "ordi".to_string());
    let mints: usize = std::env::var("ORD_MINTS")
        .ok()
        .map(|value| value.parse())
        .transpose()
        .context("ORD_MINTS is not a number")?
        .unwrap_or(1);

    let output_type = OutputType::from_address(&sender_address)?;
    let signer = KeyManager::new(&wif, output_type, network).context("Failed to load sender key")?;
    anyhow::ensure!(
        signer.get_address().to_string() == sender_address,
        "ORD_SENDER_WIF does not control {sender_address}"
    );

    let mut requests = vec![InscriptionRequest::new(
        BRC20_CONTENT_TYPE,
        format!(r#"{{"p":"brc-20","op":"deploy","tick":"{ticker}","max":"21000000","lim":"1000"}}"#),
        recipient.clone(),
    )];
    requests.extend((0..mints).map(|_| {
        InscriptionRequest::new(
            BRC20_CONTENT_TYPE,
            format!(r#"{{"p":"brc-20","op":"mint","tick":"{ticker}","amt":"1000"}}"#),
            recipient.clone(),
        )
    }));

    let config = InscriptionConfig::new(&settings, sender_address.clone(), sender_address, requests);
    let client = create_indexer(&settings).context("Failed to create indexer")?;

    let mut inscriber = match std::env::var("ORD_SNAPSHOT") {
        Ok(snapshot) => {
            let snapshot: SessionSnapshot =
                serde_json::from_str(&snapshot).context("Invalid ORD_SNAPSHOT")?;
            Inscriber::from_snapshot(client, config, snapshot)
                .context("Failed to resume session")?
        }
        Err(_) => Inscriber::new(client, config).context("Failed to create Inscriber")?,
    };

    for (index, plan) in inscriber.reveal_plans().iter().enumerate() {
        println!(
            "request {index}: {} ({})",
            plan.envelope_address, plan.required_value
        );
    }

    if inscriber.state() == InscriptionState::New {
        let unsigned = inscriber.build_commit().await?;
        let signed = inscriber.sign_commit(unsigned, &signer)?;
        let commit_txid = inscriber.broadcast_commit(&signed).await?;
        println!("commit: {commit_txid}");
    }

    // Persist this before waiting; it is all a restart needs.
    println!(
        "snapshot: {}",
        serde_json::to_string(&inscriber.snapshot())?
    );

    let (_stop_sender, stop_receiver) = watch::channel(false);
    let report = inscriber
        .inscribe(&signer, stop_receiver)
        .await
        .context("Failed to reveal inscriptions")?;

    for txid in report.revealed_txids() {
        println!("reveal: {txid}");
    }
    for (index, err) in report.failures() {
        println!("request {index} failed: {err}");
    }

    Ok(())
}
