use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;

use noghresod_sync::config::Config;
use noghresod_sync::connectivity::Connectivity;
use noghresod_sync::shop::{Cart, Category, Order, Product, User};
use noghresod_sync::{logging, Resource, ResourceStream, SyncContext};

#[derive(Parser, Debug)]
#[command(name = "noghre")]
#[command(about = "Offline-first command line client for the NoghreSod silver marketplace")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/noghre/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Serve reads from the local cache only
  #[arg(long, global = true)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Sign in; the password is read from NOGHRE_PASSWORD
  Login { phone: String },
  /// Create an account; the password is read from NOGHRE_PASSWORD
  Register {
    phone: String,
    first_name: String,
    last_name: String,
  },
  /// Sign out and clear every cached table
  Logout,
  /// Show sign-in and connectivity state
  Status,
  Categories,
  Products {
    #[arg(long)]
    category: Option<String>,
    #[arg(long, default_value_t = 1)]
    page: u32,
  },
  Search {
    text: String,
    #[arg(long, default_value_t = 1)]
    page: u32,
  },
  Product { id: String },
  Cart,
  CartAdd {
    product: String,
    #[arg(long, default_value_t = 1)]
    quantity: u32,
  },
  CartUpdate { item: String, quantity: u32 },
  CartRemove { item: String },
  CartClear,
  /// Place an order for the current cart
  Checkout {
    address: String,
    #[arg(long)]
    note: Option<String>,
  },
  Orders {
    #[arg(long, default_value_t = 1)]
    page: u32,
  },
  Order { id: String },
  Profile,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.logging.level, &Config::data_dir()?.join("logs"))?;

  let ctx = SyncContext::new(&config)?;
  if args.offline {
    ctx.connectivity.set_online(false);
  } else {
    ctx
      .connectivity
      .probe(&config.base_url()?, config.connect_timeout())
      .await;
  }

  run(&ctx, args.command).await
}

async fn run(ctx: &SyncContext, command: Command) -> Result<()> {
  match command {
    Command::Login { phone } => {
      let password = Config::get_password()?;
      let user = ctx.auth.login(&phone, &password).await?;
      println!("Signed in as {}", user.full_name());
    }
    Command::Register {
      phone,
      first_name,
      last_name,
    } => {
      let password = Config::get_password()?;
      let user = ctx
        .auth
        .register(&phone, &password, &first_name, &last_name)
        .await?;
      println!("Registered {}", user.full_name());
    }
    Command::Logout => {
      ctx.auth.logout().await?;
      println!("Signed out");
    }
    Command::Status => {
      let online = if ctx.connectivity.is_online() {
        "online"
      } else {
        "offline"
      };
      match ctx.tokens.record() {
        Some(record) => println!(
          "signed in (user {}), token expires {}, {}",
          record.user_id.as_deref().unwrap_or("unknown"),
          record.expires_at.to_rfc3339(),
          online
        ),
        None => println!("signed out, {}", online),
      }
    }
    Command::Categories => print_states(ctx.categories.watch_categories(), print_categories).await?,
    Command::Products { category, page } => {
      print_states(
        ctx.products.watch_products(category.as_deref(), page),
        print_products,
      )
      .await?
    }
    Command::Search { text, page } => {
      print_states(ctx.products.search(&text, page), print_products).await?
    }
    Command::Product { id } => print_states(ctx.products.watch_product(&id), print_product).await?,
    Command::Cart => print_states(ctx.cart.watch_cart(), print_cart).await?,
    Command::CartAdd { product, quantity } => {
      print_cart(&ctx.cart.add_item(&product, quantity).await?)
    }
    Command::CartUpdate { item, quantity } => {
      print_cart(&ctx.cart.update_quantity(&item, quantity).await?)
    }
    Command::CartRemove { item } => print_cart(&ctx.cart.remove_item(&item).await?),
    Command::CartClear => {
      ctx.cart.clear().await?;
      println!("Cart cleared");
    }
    Command::Checkout { address, note } => {
      let order = ctx.orders.place_order(&address, note.as_deref()).await?;
      print_order(&order);
    }
    Command::Orders { page } => print_states(ctx.orders.watch_orders(page), print_orders).await?,
    Command::Order { id } => print_states(ctx.orders.watch_order(&id), print_order).await?,
    Command::Profile => print_states(ctx.users.watch_profile(), print_user).await?,
  }

  Ok(())
}

/// Print every emitted state in order. Fails if the read ended in an error.
async fn print_states<T>(mut stream: ResourceStream<T>, render: fn(&T)) -> Result<()> {
  let mut last_error = None;
  while let Some(state) = stream.next_state().await {
    match state {
      Resource::Loading => println!("[loading]"),
      Resource::Success { data, source } => {
        if source.is_cache() {
          println!("[cached]");
        } else {
          println!("[network]");
        }
        render(&data);
        last_error = None;
      }
      Resource::Error(e) => {
        println!("[error: {:?}] {}", e.kind(), e);
        last_error = Some(e);
      }
    }
  }

  match last_error {
    Some(e) => Err(e.into()),
    None => Ok(()),
  }
}

fn print_categories(categories: &Vec<Category>) {
  for c in categories {
    println!("  {:<16} {} ({} products)", c.id, c.name, c.product_count);
  }
}

fn print_products(products: &Vec<Product>) {
  for p in products {
    print_product(p);
  }
}

fn print_product(p: &Product) {
  let stock = if p.in_stock() { "" } else { " [out of stock]" };
  println!(
    "  {:<16} {} - {} Toman, {}g{}",
    p.id,
    p.name,
    p.effective_price(),
    p.weight_grams,
    stock
  );
}

fn print_cart(cart: &Cart) {
  if cart.is_empty() {
    println!("  (empty)");
    return;
  }
  for item in &cart.items {
    println!(
      "  {:<16} {} x{} = {} Toman",
      item.id,
      item.name,
      item.quantity,
      item.line_total()
    );
  }
  println!("  total: {} Toman ({} items)", cart.total(), cart.item_count());
}

fn print_orders(orders: &Vec<Order>) {
  for o in orders {
    print_order(o);
  }
}

fn print_order(o: &Order) {
  println!(
    "  {:<16} {:<10} {} Toman, placed {}",
    o.id,
    o.status.code(),
    o.total,
    o.created_at.format("%Y-%m-%d %H:%M")
  );
}

fn print_user(u: &User) {
  println!("  {} <{}>", u.full_name(), u.phone);
  if let Some(email) = &u.email {
    println!("  email: {}", email);
  }
  if let Some(address) = u.default_address() {
    println!("  ships to: {}, {}, {}", address.street, address.city, address.province);
  }
}
