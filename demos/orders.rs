// Two securities receiving orders 0..N from P producer threads.
//
// W = 0 calls the securities inline (no queues); otherwise W pool workers
// drain the mailboxes. Ctrl+C stops publishing early; the run still waits
// for every published order and checks the sums.
//
// cargo run --release --example orders -- 50000000 2 2
use bq_actors::Actor::{Mailbox, MailboxBuilder};
use bq_actors::BQueue::Structs::Wait;
use bq_actors::Core::Scheduler;
use bq_actors::Messaging::{Address, Calls, ChannelBuilder, MessageProducer};
use bq_actors::CallError;
use crossbeam_utils::Backoff;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Default)]
struct Security {
    sum: i64,
    orders: u64,
    last_price: i32,
    verdict: Option<bool>,
}

fn r_place_order(s: &mut Security, calls: &mut Calls<'_, Security>) -> Result<(), CallError> {
    loop {
        let order_id = calls.pop_arg::<i32>()?;
        s.last_price = calls.pop_arg::<i32>()?;
        let _volume = calls.pop_arg::<i32>()?;
        s.sum += order_id as i64;
        s.orders += 1;
        if !calls.next() {
            return Ok(());
        }
    }
}

fn r_check(s: &mut Security, calls: &mut Calls<'_, Security>) -> Result<(), CallError> {
    let expected = calls.pop_arg::<i64>()?;
    info!("We have {} and need {}", s.sum, expected);
    s.verdict = Some(s.sum == expected);
    Ok(())
}

enum Route {
    Queued(MessageProducer<Security>),
    Direct(Arc<Mailbox<Security>>),
}

impl Route {
    fn place_order(&mut self, order_id: i32, price: i32, volume: i32) {
        match self {
            Route::Queued(tx) => {
                if let Some(mut call) = tx.begin_push_call(Address::new(r_place_order), Wait::Block) {
                    call.push_arg(order_id).push_arg(price).push_arg(volume);
                }
            }
            Route::Direct(mailbox) => {
                let backoff = Backoff::new();
                loop {
                    if let Some(mut security) = mailbox.try_acquire() {
                        security.last_price = price;
                        security.sum += order_id as i64;
                        security.orders += 1;
                        break;
                    }
                    backoff.snooze();
                }
            }
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <orders> [producers=1] [workers=1]", args[0]);
        std::process::exit(1);
    }
    let orders: usize = args[1].parse()?;
    let producers: usize = args.get(2).map_or(Ok(1), |s| s.parse())?;
    let workers: usize = args.get(3).map_or(Ok(1), |s| s.parse())?;
    if producers == 0 || orders > i32::MAX as usize {
        eprintln!("need at least one producer and at most {} orders", i32::MAX);
        std::process::exit(1);
    }

    let stop = Arc::new(AtomicBool::new(false));
    let stop_for_handler = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        stop_for_handler.store(true, Ordering::SeqCst);
    })?;

    let scheduler = Scheduler::with_threads(workers.max(1))?;
    let mut securities = Vec::new();
    for _ in 0..2 {
        securities.push(
            MailboxBuilder::new()
                .with_scheduler(Arc::clone(&scheduler))
                .with_channel(ChannelBuilder::new().with_max_call_bytes(12).with_max_call_refs(0))
                .build(Security::default())?,
        );
    }
    info!(orders, producers, workers, "publishing");

    let start = Instant::now();
    let mut handles = Vec::new();
    for p in 0..producers {
        let mut routes = Vec::new();
        for mailbox in &securities {
            routes.push(if workers == 0 {
                Route::Direct(Arc::clone(mailbox))
            } else {
                Route::Queued(mailbox.connect()?)
            });
        }
        let stop = Arc::clone(&stop);
        handles.push(thread::spawn(move || {
            let (mut count, mut published) = (0u64, 0i64);
            for (n, i) in (p..orders).step_by(producers).enumerate() {
                if n % 1024 == 0 && stop.load(Ordering::Relaxed) {
                    break;
                }
                for route in routes.iter_mut() {
                    route.place_order(i as i32, i as i32, 1);
                }
                count += 1;
                published += i as i64;
            }
            (count, published)
        }));
    }

    let (mut sent, mut expected) = (0u64, 0i64);
    for handle in handles {
        match handle.join() {
            Ok((count, published)) => {
                sent += count;
                expected += published;
            }
            Err(_) => error!("producer thread panicked"),
        }
    }
    let publish_time = start.elapsed();
    if stop.load(Ordering::SeqCst) {
        info!("interrupted; draining what was published");
    }
    scheduler.wait_all();
    let drain_time = start.elapsed();

    let mut ok = true;
    for mailbox in &securities {
        if workers > 0 {
            let mut tx = mailbox.connect()?;
            if let Some(mut call) = tx.begin_push_call(Address::new(r_check), Wait::Block) {
                call.push_arg(expected);
            };
        }
    }
    scheduler.wait_all();

    for mailbox in &securities {
        let Some(security) = mailbox.try_acquire() else {
            error!(mailbox = mailbox.id(), "mailbox still busy after wait_all");
            ok = false;
            continue;
        };
        let matches = security.verdict.unwrap_or(security.sum == expected);
        info!(
            mailbox = mailbox.id(),
            sum = security.sum,
            orders = security.orders,
            last_price = security.last_price,
            stats = ?mailbox.stats(),
            "security done"
        );
        ok &= matches;
    }

    println!("Published in {:.2?}, drained in {:.2?}", publish_time, drain_time);
    println!(
        "Throughput: {:.2} calls/sec",
        securities.len() as f64 * sent as f64 / drain_time.as_secs_f64()
    );
    if ok {
        println!("Sums match: {}", expected);
        Ok(())
    } else {
        error!(expected, "sum mismatch");
        std::process::exit(2);
    }
}
