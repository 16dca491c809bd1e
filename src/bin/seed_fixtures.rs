//! Fixture seeding tool
//!
//! Creates a partner, an API key, a terminal and N synthetic transactions
//! through the regular ingestion path, then reports the insertion rate.
//!
//! Run with: cargo run --bin seed_fixtures --release -- --transactions 1000

use std::time::Instant;

use chrono::{Duration, Utc};
use rand::Rng;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use pos_partner_api::domain::{Money, NewTransaction, TxnStatus};
use pos_partner_api::store::{Repositories, TransactionRepository};

fn arg<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let count: u64 = arg(&args, "--transactions").unwrap_or(1000);
    let allow_ip: String = arg(&args, "--allow-ip").unwrap_or_else(|| "127.0.0.1".to_string());

    let database_url = std::env::var("DATABASE_URL")?;

    println!("Seeding {} transactions", count);
    println!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await?;

    let mut rng = rand::thread_rng();
    let partner_id = Uuid::new_v4();
    let api_key = format!("pk_test_{}", hex::encode(rng.gen::<[u8; 12]>()));
    let secret = hex::encode(rng.gen::<[u8; 32]>());
    let terminal_id = format!("TID{:06}", rng.gen_range(0..1_000_000));

    sqlx::query("INSERT INTO partners (id, name, status) VALUES ($1, $2, 'active')")
        .bind(partner_id)
        .bind("Fixture Partner")
        .execute(&pool)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO partner_api_keys (api_key, partner_id, secret, permissions, ip_allowlist)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(&api_key)
    .bind(partner_id)
    .bind(&secret)
    .bind(vec!["read".to_string(), "export".to_string()])
    .bind(vec![allow_ip.clone()])
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO pos_terminals (terminal_id, device_serial, machine_type, partner_id, status)
        VALUES ($1, $2, 'android_pos', $3, 'active')
        "#,
    )
    .bind(&terminal_id)
    .bind(format!("SN-{}", terminal_id))
    .bind(partner_id)
    .execute(&pool)
    .await?;

    let transactions = Repositories::postgres(pool.clone()).transactions;
    let statuses = [TxnStatus::Authorized, TxnStatus::Captured, TxnStatus::Failed];
    let modes = ["CARD", "UPI", "WALLET"];

    let start = Instant::now();
    let mut success_count = 0u64;

    for i in 0..count {
        let txn_time = Utc::now() - Duration::minutes(rng.gen_range(0..60 * 24 * 30));
        let txn = NewTransaction {
            partner_id,
            terminal_id: terminal_id.clone(),
            external_txn_id: format!("SEED-{}", Uuid::new_v4()),
            external_ref: None,
            amount: Money::from_minor(rng.gen_range(100..5_000_000)),
            currency: "INR".to_string(),
            status: statuses[rng.gen_range(0..statuses.len())],
            settlement_status: None,
            payment_mode: Some(modes[rng.gen_range(0..modes.len())].to_string()),
            card_brand: None,
            card_type: None,
            card_masked: None,
            customer_name: None,
            auth_code: None,
            rrn: None,
            issuing_bank: None,
            acquiring_bank: None,
            receipt_url: None,
            device_serial: None,
            txn_time,
            raw_payload: serde_json::json!({ "source": "seed_fixtures" }),
        };

        match transactions.apply(txn).await {
            Ok(_) => success_count += 1,
            Err(e) => eprintln!("Insert failed: {}", e),
        }

        if (i + 1) % 1000 == 0 {
            println!("Inserted {} transactions...", i + 1);
        }
    }

    let elapsed = start.elapsed();
    let rate = success_count as f64 / elapsed.as_secs_f64();

    println!("\n=== Seed Results ===");
    println!("Partner:    {}", partner_id);
    println!("API key:    {}", api_key);
    println!("Secret:     {}", secret);
    println!("Terminal:   {}", terminal_id);
    println!("Allowed IP: {}", allow_ip);
    println!("Inserted:   {}/{}", success_count, count);
    println!("Time:       {:.2}s", elapsed.as_secs_f64());
    println!("Rate:       {:.0} transactions/sec", rate);

    pool.close().await;
    Ok(())
}
