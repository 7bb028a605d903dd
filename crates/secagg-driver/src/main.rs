//! CLI entry point: wires a roster of in-process [`secagg_core::Client`]s
//! to one [`secagg_core::Aggregator`] and drives the four rounds in
//! sequence, simulating dropouts between rounds on request.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rand::Rng;
use secagg_core::{aggregator::Aggregator, client::Client, Pid, ProtocolConfig};
use tracing::info;

#[derive(Parser)]
#[command(name = "secagg-driver")]
#[command(about = "Runs a secure aggregation protocol round sequence over simulated clients")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full protocol instance with randomly generated secrets.
    Run {
        /// Number of clients.
        #[arg(long, default_value = "4")]
        n: u32,
        /// Reconstruction threshold.
        #[arg(long, default_value = "2")]
        t: u32,
        /// Comma-separated zero-based client indices to drop after round 1.
        #[arg(long, value_delimiter = ',')]
        drop_after_round1: Vec<u32>,
        /// Comma-separated zero-based client indices to drop after round 2.
        #[arg(long, value_delimiter = ',')]
        drop_after_round2: Vec<u32>,
    },
    /// Run with explicit secrets, one per client.
    RunWith {
        /// Comma-separated secret values.
        #[arg(long, value_delimiter = ',')]
        secrets: Vec<f64>,
        /// Reconstruction threshold.
        #[arg(long, default_value = "2")]
        t: u32,
        #[arg(long, value_delimiter = ',')]
        drop_after_round1: Vec<u32>,
        #[arg(long, value_delimiter = ',')]
        drop_after_round2: Vec<u32>,
    },
}

fn run(secrets: Vec<f64>, t: u32, drop1: &[u32], drop2: &[u32]) -> Result<()> {
    let n = secrets.len() as u32;
    let config = ProtocolConfig::new(n, t);
    config.validate().context("invalid protocol configuration")?;

    let mut clients: Vec<Client> = secrets
        .iter()
        .enumerate()
        .map(|(i, &secret)| Client::new(Pid::from_index(i as u32), secret, config))
        .collect();
    let roster: Vec<(Pid, f64)> = clients.iter().map(|c| (c.id(), c.secret())).collect();
    let mut aggregator = Aggregator::new(roster, config);

    info!(n, t, "round0: generating key pairs");
    let mut keys = BTreeMap::new();
    for c in &mut clients {
        keys.insert(c.id(), c.round0());
    }
    let broadcast = aggregator.round0(keys)?;
    for c in &mut clients {
        c.receive_clients(broadcast.clone())?;
    }

    let up: std::collections::BTreeSet<Pid> = clients.iter().map(|c| c.id()).collect();
    info!("round1: exchanging ciphertext shares");
    let mut outgoing = BTreeMap::new();
    for c in &mut clients {
        if let Some(bundle) = c.round1() {
            outgoing.insert(c.id(), bundle);
        }
    }
    let pivoted = aggregator.round1(&up, outgoing)?;
    for c in &mut clients {
        if let Some(bundle) = pivoted.get(&c.id()) {
            c.receive_ciphertexts(bundle.clone())?;
        }
    }

    for &index in drop1 {
        if let Some(c) = clients.get_mut(index as usize) {
            info!(client = index, "dropping client after round 1");
            c.put_down();
        }
    }

    info!("round2: submitting masked values");
    let mut masked = BTreeMap::new();
    for c in &mut clients {
        if let Some(v) = c.round2() {
            masked.insert(c.id(), v);
        }
    }
    let u3 = aggregator.round2(masked)?;
    for c in &mut clients {
        if !c.is_down() {
            c.receive_client_ids_u3(u3.clone())?;
        }
    }

    for &index in drop2 {
        if let Some(c) = clients.get_mut(index as usize) {
            info!(client = index, "dropping client after round 2");
            c.put_down();
        }
    }

    info!("round3: disclosing share material");
    let mut responses = BTreeMap::new();
    for c in &mut clients {
        if let Some(result) = c.round3() {
            responses.insert(c.id(), result?);
        }
    }
    let mean = aggregator.round3(responses)?;
    let plaintext_mean = aggregator.aggregate_without_secrecy();

    println!("masked-protocol mean:  {mean:.6}");
    println!("plaintext (insecure) mean: {plaintext_mean:.6}");
    println!(
        "difference: {:.8} (fixed-point rounding only)",
        (mean - plaintext_mean).abs()
    );
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            n,
            t,
            drop_after_round1,
            drop_after_round2,
        } => {
            if n == 0 {
                bail!("n must be at least 1");
            }
            let mut rng = rand::thread_rng();
            let secrets: Vec<f64> = (0..n).map(|_| rng.gen_range(-1000.0..1000.0)).collect();
            run(secrets, t, &drop_after_round1, &drop_after_round2)
        }
        Commands::RunWith {
            secrets,
            t,
            drop_after_round1,
            drop_after_round2,
        } => run(secrets, t, &drop_after_round1, &drop_after_round2),
    }
}
