//! SEEDSWEEP — seed account scanner and transfer finality engine
//!
//! Entry point. Loads configuration, initialises structured logging, reads
//! the seed, then runs the interactive scan → report → move → confirm loop
//! until the user is done or Ctrl+C is pressed.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use seedsweep::config::AppConfig;
use seedsweep::console::{in_red, render_account, render_event, Console, Interrupted};
use seedsweep::engine::clock::{cancellation, CancelSignal};
use seedsweep::engine::finality::FinalityEngine;
use seedsweep::engine::scanner::AccountScanner;
use seedsweep::engine::transfer::{self, TransferIntent};
use seedsweep::ledger::sandbox::SandboxLedger;
use seedsweep::ledger::LedgerClient;
use seedsweep::types::{AccountState, Destination, Seed, SeedAdjustment, SweepError, SEED_LEN};

type StdinConsole = Console<tokio::io::BufReader<tokio::io::Stdin>>;

const CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = if Path::new(CONFIG_PATH).exists() {
        AppConfig::load(CONFIG_PATH)?
    } else {
        AppConfig::default()
    };

    init_logging();

    println!(
        "\nWelcome!\nThis program will list all addresses of your seed with a positive balance \
         and will let you move the funds of a specific address."
    );
    info!(
        batch_size = cfg.scan.batch_size,
        parallel_batches = cfg.scan.parallel_batches,
        poll_interval_ms = cfg.confirm.poll_interval_ms,
        max_attempts = ?cfg.confirm.max_attempts,
        "SEEDSWEEP starting up"
    );

    let (shutdown, shutdown_signal) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    // Prompts give up on Ctrl+C; a running confirmation is left to the
    // engine so it can report the last tail.
    let mut console = Console::stdin().with_cancel(shutdown_signal.clone());

    match run(&cfg, &mut console, shutdown_signal.clone()).await {
        Ok(()) => {}
        Err(e) if e.downcast_ref::<Interrupted>().is_some() => {}
        Err(e) => return Err(e),
    }

    if shutdown_signal.is_cancelled() {
        info!("Shutdown signal received.");
        info!("SEEDSWEEP shut down cleanly.");
        // An abandoned stdin read blocks runtime shutdown until Enter is pressed.
        std::process::exit(0);
    }

    info!("SEEDSWEEP shut down cleanly.");
    Ok(())
}

/// The interactive session for one seed.
async fn run(cfg: &AppConfig, console: &mut StdinConsole, shutdown: CancelSignal) -> Result<()> {
    let seed = read_seed(cfg, console).await?;

    // No node transport ships with this binary; the sandbox stands in for it.
    let sandbox = SandboxLedger::for_seed(&seed, &cfg.sandbox);
    warn!("Running against the in-process sandbox ledger");
    let ledger: Arc<dyn LedgerClient> = Arc::new(sandbox);

    let scanner = AccountScanner::new(ledger.clone(), seed, cfg.scan_config())?;
    let engine = FinalityEngine::new(ledger.clone(), cfg.finality_config());

    loop {
        let state = match scan_account(&scanner, console, &shutdown).await {
            Ok(state) => state,
            Err(e) if is_retryable(&e) => {
                error!(error = %e, "Scan failed");
                if console.confirm("\nScanning failed. Start over? (y/n): ").await? {
                    continue;
                }
                break;
            }
            Err(e) => return Err(e),
        };

        println!("{}", render_account(&state));
        if state.total_balance() > 0 {
            move_balance(ledger.as_ref(), &scanner, &engine, &state, console, &shutdown).await?;
        } else {
            println!("No funds found on the scanned addresses.");
        }

        if shutdown.is_cancelled() {
            break;
        }
        if !console
            .confirm("\nDo you want to move funds of another address of this seed? (y/n): ")
            .await?
        {
            break;
        }
    }
    Ok(())
}

fn is_retryable(e: &anyhow::Error) -> bool {
    e.downcast_ref::<SweepError>()
        .map(SweepError::is_retryable)
        .unwrap_or(false)
}

/// Seed from the configured env var, or prompted for until valid.
async fn read_seed(cfg: &AppConfig, console: &mut StdinConsole) -> Result<Seed> {
    if let Ok(raw) = AppConfig::resolve_env(&cfg.wallet.seed_env) {
        let (seed, adjustment) = Seed::normalize(&raw)?;
        if adjustment != SeedAdjustment::None {
            warn!(env = %cfg.wallet.seed_env, ?adjustment, "Seed from environment was adjusted");
        }
        return Ok(seed);
    }

    loop {
        let raw = console.ask("\nEnter seed: ").await?;
        let (seed, adjustment) = match Seed::normalize(&raw) {
            Ok(normalized) => normalized,
            Err(e) => {
                println!("\n{e}");
                continue;
            }
        };
        let question = match adjustment {
            SeedAdjustment::None => return Ok(seed),
            SeedAdjustment::Padded(_) => format!(
                "The seed has less than {SEED_LEN} characters. Do you want to continue with this seed? (y/n): "
            ),
            SeedAdjustment::Truncated(_) => format!(
                "The seed has more than {SEED_LEN} characters. Do you want to continue with this seed? (y/n): "
            ),
        };
        if console.confirm(&question).await? {
            println!();
            return Ok(seed);
        }
    }
}

/// Scan batch by batch; once funds show up, ask whether the total is complete.
async fn scan_account(
    scanner: &AccountScanner,
    console: &mut StdinConsole,
    shutdown: &CancelSignal,
) -> Result<AccountState> {
    let mut session = scanner.scan();
    loop {
        if shutdown.is_cancelled() {
            return Err(Interrupted.into());
        }
        let progress = session.next_step().await?;
        println!(
            "\nScanned addresses #{} to #{}",
            progress.batch_start, progress.batch_end
        );
        if progress.total_balance > 0 {
            let question = format!(
                "\nFound a total of {}i on the first {} addresses.\nIs the total balance correct? (y/n): ",
                progress.total_balance, progress.scanned
            );
            if console.confirm(&question).await? {
                println!();
                break;
            }
        }
    }
    Ok(session.finish().await?)
}

async fn move_balance(
    ledger: &dyn LedgerClient,
    scanner: &AccountScanner,
    engine: &FinalityEngine,
    state: &AccountState,
    console: &mut StdinConsole,
    shutdown: &CancelSignal,
) -> Result<()> {
    let index = choose_index(state, console).await?;

    if state.is_spent(index) == Some(true) {
        let warning = format!(
            "{}\nThe chosen address was already used for spending.\n\
             Sending multiple times from the same address can put these funds at risk.\n\
             Are you sure you want to proceed? (y/n): ",
            in_red("WARNING!!!")
        );
        if !console.confirm(&warning).await? {
            return Ok(());
        }
    }

    let destination = loop {
        let raw = console
            .ask("Enter the address you want to move the funds to: ")
            .await?;
        match Destination::parse(&raw) {
            Ok(d) => break d,
            Err(_) => println!("Please enter a valid address (81 trytes, or 90 with checksum)."),
        }
    };

    let intent = match TransferIntent::select(state, index, destination) {
        Ok(intent) => intent,
        Err(e) => {
            println!("{e}");
            return Ok(());
        }
    };

    let question = format!(
        "\n\nMoving {}i from address \n{}\nto address\n{}\nDo you want to proceed? (y/n): ",
        intent.amount(),
        intent.source(),
        intent.destination()
    );
    if !console.confirm(&question).await? {
        return Ok(());
    }

    println!("\nSending transaction");
    let tail = match transfer::submit(ledger, scanner.seed(), intent).await {
        Ok(tail) => tail,
        Err(e) => {
            error!(error = %e, "Transfer submission failed");
            println!("Sending failed: {e}");
            return Ok(());
        }
    };
    println!("\nSuccessfully sent transaction:\n{tail}");

    println!("\nStart confirming transaction");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            debug!(
                event = %serde_json::to_string(&event).unwrap_or_default(),
                "Confirmation event"
            );
            println!("{}", render_event(&event));
        }
    });

    let outcome = engine.confirm(tail, shutdown.clone(), Some(&tx)).await;
    drop(tx);
    let _ = printer.await;

    match outcome {
        Ok(confirmation) => info!(
            tail = %confirmation.tail,
            attempts = confirmation.attempts,
            promotions = confirmation.promotions,
            reattachments = confirmation.reattachments,
            "Transfer confirmed"
        ),
        Err(e) => {
            warn!(error = %e, "Transfer left unconfirmed");
            println!(
                "\nStopped confirming. The transaction may still confirm later; last tail:\n{}",
                e.last_tail()
            );
        }
    }
    Ok(())
}

async fn choose_index(state: &AccountState, console: &mut StdinConsole) -> Result<usize> {
    loop {
        let input = console
            .ask("\nYou can move the funds of an address by entering its index number.\nAddress index: ")
            .await?;
        let index: usize = match input.parse() {
            Ok(i) => i,
            Err(_) => {
                println!("Only numerical input is allowed.");
                continue;
            }
        };
        match state.balance(index) {
            Some(b) if b > 0 => return Ok(index),
            Some(_) => println!("Address #{index} does not have a balance."),
            None => println!("Address #{index} was not scanned."),
        }
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("seedsweep=info"));

    let json_logging = std::env::var("SEEDSWEEP_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
