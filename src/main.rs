use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use walletfeed::pagination::{BatchUpdate, BatchUpdateResult, PaginationStatus};
use walletfeed::supply::{Lce, RefreshEvent, SupplyConfig, SupplyItem, SupplyKey, SupplyStream};
use walletfeed::wallet::simulated::SimulatedWalletApi;
use walletfeed::wallet::suppliers::earn_tokens_source;
use walletfeed::wallet::{
    EarnTokensParams, NetworkStatusParams, QuoteParams, UserWalletId, WalletApi, WalletSuppliers, YieldsParams,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON file with supply settings; WALLETFEED_* variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Latency of the simulated backend in milliseconds
    #[arg(long, default_value_t = 150)]
    latency_ms: u64,

    /// Make every n-th backend call fail
    #[arg(long)]
    fail_every: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch quotes while the refresh scheduler updates them
    Quotes {
        #[arg(long, default_value = "usd")]
        fiat: String,

        #[arg(required = true)]
        currencies: Vec<String>,

        #[arg(long, default_value_t = 3)]
        refreshes: u32,

        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },
    /// Network statuses of one wallet, refreshed once as if its balances changed
    Networks {
        #[arg(short, long)]
        wallet: String,

        #[arg(required = true)]
        networks: Vec<String>,
    },
    /// Page through the earn-tokens listing
    Earn {
        #[arg(long, default_value = "usd")]
        fiat: String,

        #[arg(long)]
        network: Option<String>,

        /// Re-read every loaded page afterwards and print the batches that changed
        #[arg(long)]
        refresh_apy: bool,
    },
    /// Staking yields of one wallet
    Yields {
        #[arg(short, long)]
        wallet: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "walletfeed=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    let mut api = SimulatedWalletApi::new(Duration::from_millis(args.latency_ms));
    if let Some(n) = args.fail_every {
        api = api.failing_every(n);
    }
    let api: Arc<dyn WalletApi> = Arc::new(api);

    match args.command {
        Command::Quotes {
            fiat,
            currencies,
            refreshes,
            interval_ms,
        } => watch_quotes(api, &config, &fiat, &currencies, refreshes, Duration::from_millis(interval_ms)).await,
        Command::Networks { wallet, networks } => show_networks(api, &config, &wallet, &networks).await,
        Command::Earn {
            fiat,
            network,
            refresh_apy,
        } => page_earn_tokens(api, &config, fiat, network, refresh_apy).await,
        Command::Yields { wallet } => show_yields(api, &config, &wallet).await,
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SupplyConfig> {
    let config = match path {
        Some(path) => SupplyConfig::from_json_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => SupplyConfig::default(),
    };
    Ok(config.with_env_overrides()?)
}

fn print_item<V: Serialize>(key: &SupplyKey, item: &SupplyItem<V>) -> anyhow::Result<()> {
    let line = match item {
        Lce::Loading => json!({ "key": key.as_str(), "state": "loading" }),
        Lce::Content(supplied) => json!({
            "key": key.as_str(),
            "state": "content",
            "source": format!("{:?}", supplied.source).to_lowercase(),
            "obtained_at": supplied.obtained_at.to_rfc3339(),
            "value": serde_json::to_value(&supplied.value)?,
        }),
        Lce::Error(e) => json!({ "key": key.as_str(), "state": "error", "error": e.to_string() }),
    };
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}

async fn print_settled<V>(stream: &mut SupplyStream<V>) -> anyhow::Result<()>
where
    V: Serialize + Clone + Send + Sync + 'static,
{
    let item = tokio::time::timeout(Duration::from_secs(30), stream.settled())
        .await
        .context("timed out waiting for a value")??;
    print_item(stream.key(), &item)
}

async fn watch_quotes(
    api: Arc<dyn WalletApi>,
    config: &SupplyConfig,
    fiat: &str,
    currencies: &[String],
    refreshes: u32,
    interval: Duration,
) -> anyhow::Result<()> {
    let suppliers = WalletSuppliers::new(api, config);
    let params = currencies.iter().map(|currency| QuoteParams::new(currency.as_str(), fiat));
    let streams = suppliers.quotes.invoke_many(params).await?;

    let handle = suppliers.refresh_scheduler(config).start();
    let mut updates = futures::stream::select_all(streams.into_iter().map(|stream| {
        let key = stream.key().clone();
        stream.into_stream().map(move |item| (key.clone(), item))
    }));

    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    let finish = tokio::time::sleep(interval * (refreshes + 1));
    tokio::pin!(finish);
    let mut sent = 0;

    loop {
        tokio::select! {
            Some((key, item)) = updates.next() => print_item(&key, &item)?,
            _ = ticker.tick(), if sent < refreshes => {
                sent += 1;
                handle.send(RefreshEvent::Pattern("single_quote_*".to_string())).await?;
            }
            () = &mut finish => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let stats = suppliers.quotes.store().stats().await;
    let metrics = handle.metrics().await;
    info!(
        "📊 quotes: {} producers, hit rate {:.2}, {} refreshes ({} failed)",
        stats.total_entries,
        stats.hit_rate(),
        metrics.event_refreshes + metrics.scheduled_refreshes,
        metrics.failed_refreshes
    );

    handle.shutdown().await;
    suppliers.shutdown().await;
    Ok(())
}

async fn show_networks(
    api: Arc<dyn WalletApi>,
    config: &SupplyConfig,
    wallet: &str,
    networks: &[String],
) -> anyhow::Result<()> {
    let suppliers = WalletSuppliers::new(api, config);
    let params = networks.iter().map(|network| NetworkStatusParams::new(wallet, network.as_str()));
    let mut streams = suppliers.network_statuses.invoke_many(params).await?;

    for stream in &mut streams {
        print_settled(stream).await?;
    }

    let wallet = UserWalletId::new(wallet);
    info!("💸 balances changed for {}, refreshing its networks", wallet);
    let results = suppliers
        .network_statuses
        .refresh_matching(&NetworkStatusParams::wallet_pattern(&wallet))
        .await;
    for (key, result) in results {
        if let Err(e) = result {
            println!("{}", json!({ "key": key.as_str(), "refresh_error": e.to_string() }));
        }
    }
    for stream in &streams {
        print_item(stream.key(), &stream.current())?;
    }

    let removed = suppliers.remove_wallet(&wallet).await;
    info!("🗑️  removed {} streams of {}", removed, wallet);
    suppliers.shutdown().await;
    Ok(())
}

async fn page_earn_tokens(
    api: Arc<dyn WalletApi>,
    config: &SupplyConfig,
    fiat: String,
    network: Option<String>,
    refresh_apy: bool,
) -> anyhow::Result<()> {
    let source = earn_tokens_source(api, config);
    let params = match network {
        Some(network) => EarnTokensParams::new(fiat).on_network(network),
        None => EarnTokensParams::new(fiat),
    };

    source.reload(params.clone()).await;
    loop {
        let state = source.current();
        match &state.status {
            PaginationStatus::InitialLoadingError(e) => anyhow::bail!("first page failed: {e}"),
            PaginationStatus::Paginating { last_error: Some(e) } => anyhow::bail!("next page failed: {e}"),
            PaginationStatus::EndOfPagination => break,
            _ => {}
        }
        if !source.load_more(None).await {
            break;
        }
    }

    let state = source.current();
    for batch in &state.batches {
        println!("{}", json!({ "batch": batch.key, "items": serde_json::to_value(&batch.data)? }));
    }
    info!("📄 {} earn tokens in {} batches", state.items().count(), state.batches.len());

    if refresh_apy {
        let keys = state.batches.iter().map(|batch| batch.key);
        let update = BatchUpdate::new("refresh-apy", keys, params).streaming();
        match source.update_batches(update).await {
            Some(BatchUpdateResult::Error(e)) => anyhow::bail!("apy refresh failed: {e}"),
            Some(BatchUpdateResult::Success(_)) => {
                for batch in &source.current().batches {
                    println!("{}", json!({ "batch": batch.key, "refreshed": serde_json::to_value(&batch.data)? }));
                }
            }
            None => info!("⏭️  apy refresh did not run"),
        }
    }
    Ok(())
}

async fn show_yields(api: Arc<dyn WalletApi>, config: &SupplyConfig, wallet: &str) -> anyhow::Result<()> {
    let suppliers = WalletSuppliers::new(api, config);
    let mut stream = suppliers.yields.invoke(YieldsParams::new(wallet)).await?;
    print_settled(&mut stream).await?;
    suppliers.shutdown().await;
    Ok(())
}
