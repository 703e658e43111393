//! Join a queue and print live position updates.
//!
//! ```sh
//! WAITROOM_API_URL=https://queue.example.com/ \
//! WAITROOM_WS_URL=wss://queue.example.com/ \
//! cargo run --example waitroom_demo -- <resource-uuid> <token>
//! ```

use std::error::Error;
use uuid::Uuid;
use waitroom_client::config::WaitroomConfig;
use waitroom_client::session::Session;
use waitroom_core::channel::Credential;
use waitroom_core::types::ResourceId;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "waitroom_client=info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let resource_id = ResourceId::from_uuid(Uuid::parse_str(
        &args.next().ok_or("usage: waitroom_demo <resource-uuid> <token>")?,
    )?);
    let token = args.next().ok_or("usage: waitroom_demo <resource-uuid> <token>")?;

    let config = WaitroomConfig::from_env();
    let session = Session::from_config(&config, Some(Credential::new(token)))?;

    let position = match session.resume(resource_id).await? {
        Some(position) => {
            println!("resumed existing entry at rank {}", position.rank);
            position
        }
        None => session.join(resource_id).await?,
    };
    println!(
        "queued: rank {}, {} ahead, est. {:?} min",
        position.rank, position.ahead_count, position.estimated_wait_minutes
    );

    let mut states = session.subscribe();
    while states.changed().await.is_ok() {
        let state = states.borrow().clone();
        if let Some(position) = &state.position {
            match &state.countdown {
                Some(countdown) => {
                    println!("{}: complete checkout within {}", position.status, countdown.display());
                }
                None => println!("{}: rank {}, {} ahead", position.status, position.rank, position.ahead_count),
            }
        } else {
            println!("no longer queued");
            break;
        }
        if let Some(error) = &state.last_error {
            eprintln!("note: {error}");
        }
    }

    session.leave().await?;
    Ok(())
}
