//! Simulate a flash-sale spike against the commerce core and report the
//! outcome as JSON.
//!
//! Every buyer tries to claim the sale coupon, place an order for one unit,
//! and pay for it, all concurrently. Configuration comes from `COMMERCE_*`
//! variables; the spike shape comes from the flags below.
#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::expect_used))]

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::TimeDelta;
use clap::Parser;
use color_eyre::eyre::{Context, Result, eyre};
use futures_util::future::join_all;
use mockable::{Clock, DefaultClock};
use ortho_config::OrthoConfig;
use serde::Serialize;
use tokio::runtime::Builder;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use commerce_backend::domain::ports::{
    ChargeBalanceRequest, CommerceCommand, CreateOrderRequest, EventPublisher,
    IssueCouponRequest, LockCoordinator, OrderActionRequest,
};
use commerce_backend::domain::{
    Balance, BalanceLedger, CommerceCommandService, Coupon, CouponId, CouponIssuancePorts,
    CouponIssuanceService, ErrorCode, InventoryService, LockManager, Money,
    OptimisticRetryExecutor, Order, OrderCollaborators, OrderLine, OrderPorts, OrderStateMachine,
    OrderStatus, Product, ProductId, RequestContext, UserId,
};
use commerce_backend::outbound::events::BroadcastEventPublisher;
use commerce_backend::outbound::locking::{
    InMemoryLockCoordinator, RedisLockConfig, RedisLockCoordinator,
};
use commerce_backend::outbound::persistence::{InMemoryCouponStore, InMemoryVersionedStore};
use commerce_backend::settings::CommerceSettings;

const SALE_PRODUCT: ProductId = ProductId::new(1);
const SALE_COUPON: CouponId = CouponId::new(1);

/// `flash-sale` command arguments.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "flash-sale",
    about = "Run a concurrent flash-sale spike against the in-process commerce core",
    version
)]
struct CliArgs {
    /// Concurrent buyers.
    #[arg(long, default_value_t = 150)]
    buyers: u64,
    /// Units of the sale product.
    #[arg(long, default_value_t = 100)]
    stock: u32,
    /// Coupon issuance cap.
    #[arg(long = "coupon-cap", default_value_t = 100)]
    coupon_cap: u32,
    /// Coupon discount in basis points.
    #[arg(long = "discount-bps", default_value_t = 1_000)]
    discount_bps: u32,
    /// Unit price in minor units.
    #[arg(long, default_value_t = 3_000)]
    price: u64,
    /// Top-up charged to every buyer before the sale opens.
    #[arg(long = "top-up", default_value_t = 5_000)]
    top_up: u64,
    /// Runtime worker threads.
    #[arg(long = "worker-threads", default_value_t = 4)]
    worker_threads: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary {
    strategy: String,
    buyers: u64,
    initial_stock: u32,
    remaining_stock: u32,
    completed_orders: usize,
    coupons_issued: u32,
    events_published: usize,
    outcomes: BTreeMap<String, usize>,
}

struct Sale {
    command: CommerceCommandService,
    products: Arc<InMemoryVersionedStore<Product>>,
    orders: Arc<InMemoryVersionedStore<Order>>,
    coupons: Arc<InMemoryCouponStore>,
    timeout: Option<Duration>,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    if let Err(error) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(%error, "tracing init failed");
    }

    let args = CliArgs::parse();
    let runtime = Builder::new_multi_thread()
        .worker_threads(args.worker_threads.max(1))
        .enable_all()
        .build()
        .wrap_err("failed to build flash-sale runtime")?;
    let summary = runtime.block_on(run(args))?;

    let rendered = serde_json::to_string_pretty(&summary).wrap_err("render summary")?;
    println!("{rendered}");
    Ok(())
}

async fn run(args: CliArgs) -> Result<Summary> {
    let settings = CommerceSettings::load_from_iter([OsString::from("flash-sale")])
        .map_err(|error| eyre!("failed to load commerce settings: {error}"))?;
    let strategy = settings.reservation_strategy()?;
    let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
    let publisher = Arc::new(BroadcastEventPublisher::new(settings.event_buffer()));
    let events_seen = Arc::new(AtomicUsize::new(0));
    let listener = spawn_event_counter(&publisher, events_seen.clone());

    let sale = wire(&settings, clock.clone(), publisher.clone()).await?;
    seed(&sale, &args, clock.as_ref());
    top_up(&sale, &args).await?;
    info!(buyers = args.buyers, stock = args.stock, ?strategy, "sale open");

    let outcomes = spike(&sale, &args).await?;
    drop(sale.command);
    drop(publisher);
    listener.await.wrap_err("event listener stopped")?;

    let remaining_stock = sale
        .products
        .snapshot(SALE_PRODUCT)
        .map(|row| row.record.stock_quantity)
        .ok_or_else(|| eyre!("sale product disappeared"))?;
    let completed_orders = sale
        .orders
        .all()
        .iter()
        .filter(|row| row.record.status == OrderStatus::Completed)
        .count();
    let sold = u32::try_from(completed_orders).wrap_err("order count overflow")?;
    if remaining_stock.saturating_add(sold) != args.stock {
        return Err(eyre!(
            "stock invariant broken: {remaining_stock} left after {sold} sales of {}",
            args.stock
        ));
    }

    Ok(Summary {
        strategy: format!("{strategy:?}").to_lowercase(),
        buyers: args.buyers,
        initial_stock: args.stock,
        remaining_stock,
        completed_orders,
        coupons_issued: sale
            .coupons
            .snapshot(SALE_COUPON)
            .map_or(0, |row| row.record.issued_count),
        events_published: events_seen.load(Ordering::SeqCst),
        outcomes,
    })
}

async fn wire(
    settings: &CommerceSettings,
    clock: Arc<dyn Clock>,
    events: Arc<BroadcastEventPublisher>,
) -> Result<Sale> {
    let coordinator: Arc<dyn LockCoordinator> = match settings.redis_url() {
        Some(url) => Arc::new(
            RedisLockCoordinator::connect(RedisLockConfig::new(url))
                .await
                .wrap_err("failed to connect the Redis lock coordinator")?,
        ),
        None => Arc::new(InMemoryLockCoordinator::new(clock.clone())),
    };
    let lock_settings = settings.lock_settings()?;
    let locks = Arc::new(LockManager::new(coordinator, lock_settings));
    let retry = Arc::new(OptimisticRetryExecutor::new(
        settings.retry_policy()?,
        clock.clone(),
    ));

    let products = Arc::new(InMemoryVersionedStore::<Product>::new());
    let balances = Arc::new(InMemoryVersionedStore::<Balance>::new());
    let orders = Arc::new(InMemoryVersionedStore::<Order>::new());
    let coupons = Arc::new(InMemoryCouponStore::new());
    let events: Arc<dyn EventPublisher> = events;

    let inventory = Arc::new(InventoryService::new(
        products.clone(),
        locks.clone(),
        retry.clone(),
        settings.reservation_strategy()?,
        lock_settings.wait_timeout,
    ));
    let coupon_service = Arc::new(CouponIssuanceService::new(
        CouponIssuancePorts {
            coupons: coupons.clone(),
            grants: coupons.clone(),
            locks: locks.clone(),
            events: events.clone(),
            clock: clock.clone(),
        },
        settings.coupon_lock_wait()?,
    ));
    let ledger = Arc::new(BalanceLedger::new(
        balances,
        retry.clone(),
        events.clone(),
        clock.clone(),
    ));
    let state_machine = Arc::new(OrderStateMachine::new(
        OrderPorts {
            orders: orders.clone(),
            products: products.clone(),
            events,
            clock,
        },
        OrderCollaborators {
            inventory,
            coupons: coupon_service.clone(),
            ledger: ledger.clone(),
            locks,
            retry,
        },
        lock_settings.wait_timeout,
    ));

    Ok(Sale {
        command: CommerceCommandService::new(state_machine, coupon_service, ledger),
        products,
        orders,
        coupons,
        timeout: settings.request_timeout(),
    })
}

fn seed(sale: &Sale, args: &CliArgs, clock: &dyn Clock) {
    let now = clock.utc();
    sale.products.seed(Product::new(
        SALE_PRODUCT,
        "flash-sale item",
        Money::new(args.price),
        args.stock,
    ));
    sale.coupons.seed(Coupon {
        id: SALE_COUPON,
        name: "flash-sale coupon".to_owned(),
        total_quantity: args.coupon_cap,
        issued_count: 0,
        discount_bps: args.discount_bps,
        starts_at: now - TimeDelta::minutes(5),
        ends_at: now + TimeDelta::hours(1),
        disabled: false,
    });
}

async fn top_up(sale: &Sale, args: &CliArgs) -> Result<()> {
    for buyer in 1..=args.buyers {
        sale.command
            .charge_balance(
                &RequestContext::new(),
                ChargeBalanceRequest {
                    user_id: UserId::new(buyer),
                    amount: Money::new(args.top_up),
                },
            )
            .await
            .map_err(|error| eyre!("top-up for buyer {buyer} failed: {error}"))?;
    }
    Ok(())
}

async fn spike(sale: &Sale, args: &CliArgs) -> Result<BTreeMap<String, usize>> {
    let attempts = (1..=args.buyers).map(|buyer| {
        tokio::spawn(buy(sale.command.clone(), sale.timeout, UserId::new(buyer)))
    });
    let mut outcomes = BTreeMap::new();
    for joined in join_all(attempts).await {
        let outcome = joined.wrap_err("buyer task failed")?;
        *outcomes.entry(outcome).or_insert(0) += 1;
    }
    Ok(outcomes)
}

async fn buy(command: CommerceCommandService, timeout: Option<Duration>, user_id: UserId) -> String {
    let ctx = timeout.map_or_else(RequestContext::new, RequestContext::with_timeout);

    let coupon_id = match command
        .issue_coupon(
            &ctx,
            IssueCouponRequest {
                coupon_id: SALE_COUPON,
                user_id,
            },
        )
        .await
    {
        Ok(_) => Some(SALE_COUPON),
        Err(error) if error.code() == ErrorCode::LimitExceeded => None,
        Err(error) => return label(error.code()),
    };

    let order = match command
        .create_order(
            &ctx,
            CreateOrderRequest {
                user_id,
                items: vec![OrderLine::new(SALE_PRODUCT, 1)],
                coupon_id,
            },
        )
        .await
    {
        Ok(order) => order,
        Err(error) => return label(error.code()),
    };

    match command
        .pay_order(
            &ctx,
            OrderActionRequest {
                order_id: order.id,
                user_id,
            },
        )
        .await
    {
        Ok(_) => "completed".to_owned(),
        Err(error) => label(error.code()),
    }
}

fn label(code: ErrorCode) -> String {
    serde_json::to_value(code)
        .ok()
        .and_then(|value| value.as_str().map(str::to_owned))
        .unwrap_or_else(|| format!("{code:?}"))
}

fn spawn_event_counter(
    publisher: &BroadcastEventPublisher,
    seen: Arc<AtomicUsize>,
) -> tokio::task::JoinHandle<()> {
    let mut receiver = publisher.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(_) => {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    let skipped = usize::try_from(skipped).unwrap_or(usize::MAX);
                    seen.fetch_add(skipped, Ordering::SeqCst);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
