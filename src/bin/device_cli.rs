use anyhow::{bail, Result};
use devicegate::client::{DeviceClient, IdentityCache};
use std::env;

const DEFAULT_API_BASE: &str = "http://localhost:3000";
const USAGE: &str = "usage: device_cli <register <name> [--hw <id>] [--rotate] | whoami | heartbeat | forget>";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cache = match dotenvy::var("DEVICEGATE_IDENTITY") {
        Ok(path) => IdentityCache::at(path),
        Err(_) => IdentityCache::default_location()?,
    };
    let client =
        DeviceClient::from_cache(cache, dotenvy::var("DEVICEGATE_URL").ok(), DEFAULT_API_BASE).await;

    let args: Vec<String> = env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("register") => {
            let mut name = None;
            let mut hw = None;
            let mut rotate = false;
            let mut rest = args[1..].iter();
            while let Some(arg) = rest.next() {
                match arg.as_str() {
                    "--rotate" => rotate = true,
                    "--hw" => hw = rest.next().cloned(),
                    other if name.is_none() => name = Some(other.to_string()),
                    other => bail!("unexpected argument {other:?}\n{USAGE}"),
                }
            }
            let Some(name) = name else {
                bail!("{USAGE}");
            };
            let hw = hw.or_else(machine_id);

            let registered = client.register(&name, hw.as_deref(), rotate).await?;
            println!("registered {} ({})", registered.id, registered.display_name);
            println!("identity cached at {}", client.cache().path().display());
        }
        Some("whoami") => {
            let info = client.device_info().await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Some("heartbeat") => {
            let beat = client.heartbeat().await?;
            println!("{}", serde_json::to_string_pretty(&beat)?);
        }
        Some("forget") => {
            client.cache().clear().await?;
            println!("removed {}", client.cache().path().display());
        }
        _ => bail!("{USAGE}"),
    }

    Ok(())
}

/// Survives reinstalls of this tool, which is what the registry keys on.
fn machine_id() -> Option<String> {
    ["/etc/machine-id", "/var/lib/dbus/machine-id"]
        .iter()
        .find_map(|p| std::fs::read_to_string(p).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
