use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};

use crate::app::Marketplace;
use crate::errors::MarketError;
use crate::models::{Address, OrderStatus};
use crate::orders::Checkout;
use crate::payment_methods::FetchOutcome;
use crate::settings::ThemePreference;

/// Top-level CLI interface for farmlink
#[derive(Parser)]
#[command(name = "farmlink", version, about = "Farm marketplace client")]
pub struct Cli {
    /// Config file (defaults to ./farmlink.toml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in with email and password
    Login {
        #[arg(short, long)]
        email: String,
        /// Falls back to FARMLINK_PASSWORD
        #[arg(short, long, env = "FARMLINK_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Forget the stored session
    Logout,

    /// Show the signed-in user
    Whoami,

    /// Inspect or change the local cart
    #[command(subcommand)]
    Cart(CartCommand),

    /// Place an order for everything in the cart
    Checkout(CheckoutArgs),

    /// List your orders, or cancel one
    Orders {
        #[arg(long, default_value_t = 0)]
        page: usize,
        #[arg(long)]
        cancel: Option<i64>,
    },

    /// Move an order to a new status (farm or admin)
    OrderStatus {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        status: String,
    },

    /// Saved payment methods
    #[command(subcommand)]
    PaymentMethods(PaymentCommand),

    /// Show or set the theme (light, dark, system)
    Theme { value: Option<String> },
}

#[derive(Subcommand)]
pub enum CartCommand {
    Add {
        product_id: i64,
        #[arg(default_value_t = 1)]
        quantity: u32,
    },
    Remove {
        product_id: i64,
    },
    List,
    Clear,
}

#[derive(Subcommand)]
pub enum PaymentCommand {
    List,
    Refresh,
    CreateSchema,
}

#[derive(Args)]
pub struct CheckoutArgs {
    #[arg(long)]
    pub line1: Option<String>,
    #[arg(long)]
    pub city: Option<String>,
    #[arg(long, default_value = "")]
    pub state: String,
    #[arg(long)]
    pub postal_code: Option<String>,
    #[arg(long)]
    pub shipping_method: Option<i64>,
    #[arg(long)]
    pub payment_method: Option<i64>,
    #[arg(long)]
    pub discount: Option<String>,
}

impl CheckoutArgs {
    fn address(&self) -> anyhow::Result<Option<Address>> {
        match (&self.line1, &self.city, &self.postal_code) {
            (None, None, None) => Ok(None),
            (Some(line1), Some(city), Some(postal_code)) => Ok(Some(Address {
                line1: line1.clone(),
                line2: None,
                city: city.clone(),
                state: self.state.clone(),
                postal_code: postal_code.clone(),
                country: "US".to_string(),
            })),
            _ => bail!("--line1, --city and --postal-code go together"),
        }
    }
}

fn describe(err: MarketError) -> anyhow::Error {
    anyhow::anyhow!(err.user_message())
}

pub async fn dispatch(cli: Cli, market: &Marketplace) -> anyhow::Result<()> {
    match cli.command {
        Commands::Login { email, password } => {
            let session = market.auth.login(&email, &password).await.map_err(describe)?;
            println!("✅ Signed in as {} ({})", session.display_name(), session.role);
        }
        Commands::Logout => {
            market.logout().map_err(describe)?;
            println!("Signed out");
        }
        Commands::Whoami => match market.auth.current_session() {
            Some(session) => println!("{} <{}> [{}]", session.display_name(), session.email, session.role),
            None => println!("Not signed in"),
        },
        Commands::Cart(command) => run_cart(command, market).await?,
        Commands::Checkout(args) => {
            let checkout = Checkout {
                shipping_address: args.address()?,
                payment_method_id: args.payment_method,
                shipping_method_id: args.shipping_method,
                discount_code: args.discount.clone(),
            };
            let order = market.orders.place_order(checkout).await.map_err(describe)?;
            println!(
                "✅ Order #{} placed: {} item(s), total {:.2}",
                order.id,
                order.order_items.len(),
                order.total_amount
            );
        }
        Commands::Orders { page, cancel } => {
            if let Some(id) = cancel {
                let order = market.orders.cancel_order(id).await.map_err(describe)?;
                println!("Order #{} is now {}", order.id, order.status);
                return Ok(());
            }
            let orders = market.orders.list_orders(page).await.map_err(describe)?;
            if orders.is_empty() {
                println!("No orders yet");
            }
            for order in orders {
                println!(
                    "#{:<6} {:<10} {:>9.2}  {} item(s)",
                    order.id,
                    order.status,
                    order.total_amount,
                    order.order_items.len()
                );
            }
        }
        Commands::OrderStatus { id, status } => {
            let next: OrderStatus = status.parse().map_err(describe)?;
            let order = market.orders.update_order_status(id, next).await.map_err(describe)?;
            println!("Order #{} is now {}", order.id, order.status);
        }
        Commands::PaymentMethods(command) => run_payments(command, market).await?,
        Commands::Theme { value } => match value {
            Some(value) => {
                let theme: ThemePreference = value.parse().map_err(describe)?;
                market.theme.set(theme).map_err(describe)?;
                println!("Theme set to {theme}");
            }
            None => println!("{}", market.theme.get()),
        },
    }
    Ok(())
}

async fn run_cart(command: CartCommand, market: &Marketplace) -> anyhow::Result<()> {
    match command {
        CartCommand::Add { product_id, quantity } => {
            market.cart.add_to_cart(product_id, quantity);
            println!("Cart now holds {} item(s)", market.cart.item_count());
        }
        CartCommand::Remove { product_id } => {
            market.cart.remove_from_cart(product_id);
            println!("Cart now holds {} item(s)", market.cart.item_count());
        }
        CartCommand::List => {
            let client = market.handle.client();
            let lines = market.cart.hydrate(&client).await.map_err(describe)?;
            if lines.is_empty() {
                println!("Cart is empty");
            }
            for line in &lines {
                println!(
                    "{:>4} x {:<30} {:>9.2}",
                    line.quantity,
                    line.product.name,
                    line.line_total()
                );
            }
            if !lines.is_empty() {
                println!("Subtotal {:>32.2}", crate::cart::subtotal(&lines));
            }
        }
        CartCommand::Clear => {
            market.cart.clear_cart();
            println!("Cart cleared");
        }
    }
    Ok(())
}

async fn run_payments(command: PaymentCommand, market: &Marketplace) -> anyhow::Result<()> {
    let methods = match command {
        PaymentCommand::List => match market.payment_methods.auto_fetch().await {
            FetchOutcome::Loaded(_) | FetchOutcome::Skipped(_) => market.payment_methods.state().methods,
            FetchOutcome::Failed(error) => {
                bail!("could not load payment methods: {error:?}")
            }
        },
        PaymentCommand::Refresh => market.payment_methods.refresh().await.map_err(describe)?,
        PaymentCommand::CreateSchema => market
            .payment_methods
            .create_schema()
            .await
            .map_err(describe)
            .context("creating payment_methods table")?,
    };

    if methods.is_empty() {
        println!("No saved payment methods");
    }
    for method in methods {
        let marker = if method.is_default { "*" } else { " " };
        println!(
            "{marker} #{:<4} {:<10} •••• {}  {:02}/{}",
            method.id, method.card_type, method.last_four, method.expiry_month, method.expiry_year
        );
    }
    Ok(())
}
