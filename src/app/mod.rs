use crate::bridge::{Bridge, BridgeContext};
use crate::config::Config;
use crate::images::{HttpImageSource, ImageStore};
use crate::security::{unix_now, StoredToken, Vault, DEFAULT_TOKEN_LIFETIME_SECS};
use crate::upstream::SpotifyClient;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    if let Some(ref command) = std::env::args().nth(1) {
        if command == "config-init" {
            return handle_config_init();
        }
        let config = Config::load()?;
        return match command.as_str() {
            "token-set" => handle_token_set(&config),
            "token-status" => handle_token_status(&config),
            "vault-list" => handle_vault_list(&config),
            other => Err(format!(
                "unknown command {other:?} (expected token-set, token-status, vault-list or config-init)"
            )
            .into()),
        };
    }

    let config = Config::load()?;
    let access_token = match config.spotify.access_token.clone() {
        Some(token) => {
            tracing::info!("using access token from environment");
            token
        }
        None => {
            let vault = Vault::open(&config.vault_path())?;
            token_from_vault(&vault, &config.spotify.token_key, unix_now())?
        }
    };

    let api = Arc::new(
        SpotifyClient::builder(access_token)
            .base_url(config.spotify.api_base_url.clone())
            .timeout(config.request_timeout())
            .build()?,
    );
    let image_source = Arc::new(HttpImageSource::new(
        &config.spotify.image_base_url,
        config.request_timeout(),
    )?);
    let images = ImageStore::new(
        image_source,
        config.cache.image_dir.as_ref().map(PathBuf::from),
        config.cache.max_entries,
    );

    let bridge = Arc::new(Bridge::new(BridgeContext::new(
        api,
        images,
        config.bridge_options(),
    )));

    {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move { bridge.probe_devices().await });
    }
    bridge.start();

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let result = tokio::select! {
        res = crate::server::start(
            addr,
            Arc::clone(&bridge),
            config.initial_state_delay(),
            shutdown_rx,
        ) => res,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown: ctrl-c");
            let _ = shutdown_tx.send(true);
            Ok(())
        }
    };

    bridge.stop();
    result
}

/// Returns the stored access token if it has not expired at `now_unix`.
fn token_from_vault(
    vault: &Vault,
    key: &str,
    now_unix: u64,
) -> Result<String, Box<dyn std::error::Error>> {
    let token = vault
        .token(key)?
        .ok_or_else(|| format!("no access token stored under {key:?}; run `token-set <token>`"))?;
    if !token.is_valid_at(now_unix) {
        return Err(format!(
            "stored access token expired {}s ago; run `token-set <token>`",
            now_unix.saturating_sub(token.expires_at())
        )
        .into());
    }
    Ok(token.access_token)
}

fn handle_token_set(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(2);
    let access_token = args
        .next()
        .ok_or("missing access token (usage: token-set <access_token> [expires_in_secs])")?;
    let expires_in = match args.next() {
        Some(raw) => raw
            .parse()
            .map_err(|_| format!("expires_in_secs must be a number, got {raw:?}"))?,
        None => DEFAULT_TOKEN_LIFETIME_SECS,
    };

    let mut vault = Vault::open(&config.vault_path())?;
    let token = StoredToken::new(access_token.trim(), expires_in);
    vault.store_token(&config.spotify.token_key, &token)?;

    println!(
        "Stored access token under {} (valid for {}s)",
        config.spotify.token_key, expires_in
    );
    Ok(())
}

fn handle_token_status(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let vault = Vault::open(&config.vault_path())?;
    match vault.token(&config.spotify.token_key)? {
        Some(token) if token.is_valid() => {
            println!("valid, {}s remaining", token.remaining_secs());
        }
        Some(_) => println!("expired"),
        None => println!("missing"),
    }
    Ok(())
}

fn handle_vault_list(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let vault = Vault::open(&config.vault_path())?;
    for key in vault.list_keys() {
        println!("{}", key);
    }
    Ok(())
}

fn handle_config_init() -> Result<(), Box<dyn std::error::Error>> {
    let path = Config::default_path();
    Config::write_default(&path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}
