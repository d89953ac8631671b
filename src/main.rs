//! Loyalty Companion - Main Entry Point
//!
//! Headless companion client for the loyalty backend. Bootstraps a
//! session (Telegram-first) and runs one command against the API.

use anyhow::Context;
use tracing::info;

use loyalty_companion::{
    config::Config, guard::Route, storage::Role, telegram::HostEnvironment, AppState,
};

const USAGE: &str = "usage: loyalty-companion \
[status | login <user> <pass> | login-barista <user> <code> | logout | \
generate-code | redeem-code <code> | add-stamp <user> [amount]]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    loyalty_companion::logging::init(&config.data_dir);
    info!("Loyalty companion starting...");

    let host = HostEnvironment::detect();
    let state = AppState::new(&config, host);
    state.auth.bootstrap().await;

    let args: Vec<String> = std::env::args().skip(1).collect();
    run(&state, &args).await
}

async fn run(state: &AppState, args: &[String]) -> anyhow::Result<()> {
    match args.first().map(String::as_str) {
        None | Some("status") => status(state).await,
        Some("login") => {
            let username = arg(args, 1)?;
            let password = arg(args, 2)?;
            state
                .auth
                .login(username, password)
                .await
                .context("login failed")?;
            // Resolve the role for the freshly stored tokens.
            state.auth.bootstrap().await;
            println!("Logged in as {username}");
            Ok(())
        }
        Some("login-barista") => {
            let username = arg(args, 1)?;
            let code = arg(args, 2)?;
            state
                .auth
                .login_barista(username, code)
                .await
                .context("staff login failed")?;
            state.auth.bootstrap().await;
            println!("Logged in as {username} (staff)");
            Ok(())
        }
        Some("logout") => {
            state.auth.logout(Route::Login);
            println!("Session cleared");
            Ok(())
        }
        Some("generate-code") => {
            let response = state
                .api
                .generate_code()
                .await
                .context("code generation failed")?;
            println!("Redemption code: {}", response.code);
            Ok(())
        }
        Some("redeem-code") => {
            let code = arg(args, 1)?;
            let status = state
                .api
                .redeem_code(code)
                .await
                .context("code redemption failed")?;
            if status.detail.is_empty() {
                println!("Code redeemed");
            } else {
                println!("{}", status.detail);
            }
            Ok(())
        }
        Some("add-stamp") => {
            let username = arg(args, 1)?;
            let amount = match args.get(2) {
                Some(raw) => raw.parse().context("amount must be a number")?,
                None => 1,
            };
            let response = state
                .api
                .add_stamp(username, amount)
                .await
                .context("stamp addition failed")?;
            println!("{} now has {} stamp(s)", username, response.stamps);
            Ok(())
        }
        Some(other) => {
            anyhow::bail!("unknown command `{other}`\n{USAGE}");
        }
    }
}

async fn status(state: &AppState) -> anyhow::Result<()> {
    let session = state.store.session();
    if !session.is_authenticated() {
        println!("Not signed in");
        return Ok(());
    }

    let user = state.api.get_me().await.context("profile fetch failed")?;
    let role = state.store.role().unwrap_or(Role::Customer);
    println!("Signed in as {} ({role})", user.username);

    let status = state
        .api
        .loyalty_status(&user.username)
        .await
        .context("loyalty status fetch failed")?;
    println!("Stamps: {}", status.stamps);
    if let Some(required) = status.stamps_required {
        println!("Next reward at: {required}");
    }
    if status.rewards_available > 0 {
        println!("Rewards available: {}", status.rewards_available);
    }
    Ok(())
}

fn arg(args: &[String], index: usize) -> anyhow::Result<&str> {
    args.get(index).map(String::as_str).context(USAGE)
}
