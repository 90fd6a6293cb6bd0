use clap::{Args, Parser, Subcommand};
use famcart::config::ConfigError;
use famcart::types::{AddCartItemPayload, Credentials, RegisterPayload, UpdateCartItemPayload};
use famcart::{App, ClientConfig, ClientError};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{}: {}", .0.error_code(), .0)]
    Client(#[from] ClientError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("pass either --product-id or --name")]
    MissingItemSource,
}

#[derive(Parser, Debug)]
#[command(name = "famcart", about = "Family shared-cart client")]
struct Cli {
    /// Overrides `FSS_API_URL`.
    #[arg(long)]
    api_url: Option<String>,

    /// Overrides `FSS_WS_URL`.
    #[arg(long)]
    ws_url: Option<String>,

    /// Overrides `FSS_TOKEN_FILE`.
    #[arg(long)]
    token_file: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "FSS_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "FSS_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Logout,
    Whoami,
    Carts,
    CreateCart {
        #[arg(long)]
        name: String,
        #[arg(long)]
        family_id: String,
    },
    Share {
        cart_id: String,
        #[arg(long = "user", required = true)]
        user_ids: Vec<String>,
    },
    AddItem(AddItemArgs),
    UpdateItem {
        cart_id: String,
        item_id: String,
        #[arg(long)]
        purchased: Option<bool>,
        #[arg(long)]
        price: Option<f64>,
    },
    RemoveItem {
        cart_id: String,
        item_id: String,
    },
    /// Stream cart notifications until interrupted.
    Watch {
        cart_id: Option<String>,
    },
}

#[derive(Args, Debug)]
struct AddItemArgs {
    cart_id: String,
    #[arg(long, conflicts_with = "name")]
    product_id: Option<String>,
    #[arg(long)]
    name: Option<String>,
    #[arg(long, default_value_t = 1)]
    quantity: u32,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env()?;
    if let Some(api_url) = cli.api_url {
        config.api_url = api_url.trim_end_matches('/').to_owned();
    }
    if let Some(ws_url) = cli.ws_url {
        config.ws_url = ws_url.trim_end_matches('/').to_owned();
    }
    if let Some(token_file) = cli.token_file {
        config.token_file = token_file;
    }

    let app = App::from_config(config)?;
    app.start().await;

    let outcome = run(&app, cli.command).await;
    report_notifications(&app);
    outcome
}

async fn run(app: &App, command: Command) -> Result<(), CliError> {
    match command {
        Command::Login { email, password } => {
            let user = app.session.login(&Credentials { email, password }).await?;
            print_json(&user)
        }
        Command::Register { name, email, password } => {
            let user = app.session.register(&RegisterPayload { name, email, password }).await?;
            print_json(&user)
        }
        Command::Logout => {
            app.session.logout().await;
            Ok(())
        }
        Command::Whoami => {
            require_session(app)?;
            print_json(&app.session.user())
        }
        Command::Carts => {
            require_session(app)?;
            print_json(&app.carts.fetch_carts().await?)
        }
        Command::CreateCart { name, family_id } => {
            require_session(app)?;
            print_json(&app.carts.create_cart(&name, &family_id).await?)
        }
        Command::Share { cart_id, user_ids } => {
            require_session(app)?;
            print_json(&app.carts.share_cart(&cart_id, &user_ids).await?)
        }
        Command::AddItem(args) => {
            require_session(app)?;
            let payload = match (args.product_id, args.name) {
                (Some(product_id), _) => AddCartItemPayload::product(product_id, args.quantity),
                (None, Some(name)) => AddCartItemPayload::named(name, args.quantity),
                (None, None) => return Err(CliError::MissingItemSource),
            };
            print_json(&app.carts.add_item(&args.cart_id, &payload).await?)
        }
        Command::UpdateItem { cart_id, item_id, purchased, price } => {
            require_session(app)?;
            let payload = UpdateCartItemPayload { purchased, price };
            print_json(&app.carts.update_item(&cart_id, &item_id, &payload).await?)
        }
        Command::RemoveItem { cart_id, item_id } => {
            require_session(app)?;
            print_json(&app.carts.remove_item(&cart_id, &item_id).await?)
        }
        Command::Watch { cart_id } => {
            require_session(app)?;
            watch(app, cart_id).await
        }
    }
}

async fn watch(app: &App, cart_id: Option<String>) -> Result<(), CliError> {
    let mut events = app.notifications.subscribe();
    app.carts.fetch_carts().await?;
    if let Some(cart_id) = cart_id {
        app.carts.join_cart(&cart_id);
    }
    eprintln!("watching {}; Ctrl-C to stop", app.carts.active_cart_id().unwrap_or_else(|| "no cart".to_owned()));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            event = events.recv() => match event {
                Ok(notification) => {
                    println!("[{}] {}", variant_label(notification.variant), notification.text);
                    if let Some(cart) = app.carts.active_cart() {
                        println!("  {} ({} items)", cart.name, cart.items.len());
                    }
                }
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "notification stream lagged"),
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}

fn require_session(app: &App) -> Result<(), CliError> {
    if app.session.is_authenticated() {
        Ok(())
    } else {
        Err(ClientError::NotAuthenticated.into())
    }
}

fn report_notifications(app: &App) {
    for notification in app.notifications.messages() {
        eprintln!("[{}] {}", variant_label(notification.variant), notification.text);
    }
}

fn variant_label(variant: famcart::Variant) -> &'static str {
    match variant {
        famcart::Variant::Success => "success",
        famcart::Variant::Error => "error",
        famcart::Variant::Info => "info",
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
