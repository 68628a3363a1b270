//! Keep a Postgres connection alive and run a transaction on every connect
//!
//! Reads the libpq environment (`PGHOST`, `PGUSER`, `PGPASSWORD`, ...).
//! Stop the server while this runs to watch the supervisor reconnect.
//!
//! Run with: RUST_LOG=pgkeeper=debug cargo run --example keep_alive

use pgkeeper::{ConnectionConfig, ConnectionEvent, Connector, PgDriver};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ConnectionConfig::from_env()?;
    println!("Supervising {}", config.target());

    let connector = Connector::new(PgDriver::new());
    connector.configure(config);
    connector.set_toolset([(2, false), (6, true)]);

    let mut events = connector.subscribe();
    let supervisor = connector.spawn();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ConnectionEvent::Connected) => {
                    println!("connected");
                    report(&connector).await;
                }
                Some(ConnectionEvent::Disconnected) => println!("disconnected"),
                Some(ConnectionEvent::Error(e)) => println!("error: {}", e),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("shutting down");
                break;
            }
        }
    }

    connector.shutdown().await;
    supervisor.await??;
    Ok(())
}

async fn report(connector: &Connector) {
    let Some(reader) = connector.tool(6, true) else {
        return;
    };
    match reader
        .query("SELECT current_database() AS db, now()::text AS at, pg_backend_pid() AS pid")
        .await
    {
        Ok(rows) => {
            for row in rows {
                println!("  {}", row.to_json());
            }
        }
        Err(e) => println!("  query failed: {}", e),
    }

    if let Some(writer) = connector.tool(2, false) {
        let outcome = writer
            .transaction(&[
                "CREATE TEMP TABLE IF NOT EXISTS keeper_heartbeat (at timestamptz)",
                "INSERT INTO keeper_heartbeat VALUES (now())",
            ])
            .await;
        println!("  heartbeat transaction: {:?}", outcome.as_step_result());
    }
}
