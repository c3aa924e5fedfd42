mod util;

use desproc::{Environment, Error, Result, Scope, Server, Store};
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp};
use rand_pcg::Pcg64;
use std::cell::RefCell;
use std::rc::Rc;

const ARRIVAL_RATE: f64 = 4.0;
const CLOSING_TIME: f64 = 540.0;

/// Output statistics shared by every customer
#[derive(Debug, Default, Clone, PartialEq)]
struct Stats {
    customers_served: usize,
    total_time_in_queue: f64,
}

/// The counter customers line up for
#[derive(Clone)]
enum Counter {
    /// A single clerk, modeled as a mutual exclusion resource
    Single(Server),
    /// A pool of interchangeable clerks, modeled as a store of clerk badges
    Pool(Store<u32>),
}

impl Counter {
    fn new(env: &Environment, num_servers: u32) -> Result<Self> {
        if num_servers == 1 {
            return Ok(Self::Single(Server::new(env)));
        }

        let badges = Store::new(env, num_servers as usize)?;
        badges.initialize(0..num_servers)?;
        Ok(Self::Pool(badges))
    }
}

struct Shop {
    env: Environment,
    counter: Counter,
    service_rate: f64,
    rng: Rc<RefCell<Pcg64>>,
    stats: Rc<RefCell<Stats>>,
}

impl Shop {
    /// Spawn the process that lets customers in until closing time.
    fn open(self: Rc<Self>) -> Result {
        let env = self.env.clone();
        env.process(move |_| async move {
            let arrivals = Exp::new(ARRIVAL_RATE).map_err(Error::bad_execution)?;
            loop {
                let delay = arrivals.sample(&mut *self.rng.borrow_mut());
                self.env.timeout(delay)?.await?;
                if self.env.now() >= CLOSING_TIME {
                    return Ok(());
                }

                let service_time_random_draw: f64 = self.rng.borrow_mut().random();
                let shop = Rc::clone(&self);
                self.env.process(move |scope| shop.serve(scope, service_time_random_draw))?;
            }
        })?;
        Ok(())
    }

    /// One customer's visit: wait for a clerk, get served, leave.
    async fn serve(self: Rc<Self>, scope: Scope, random_draw: f64) -> Result {
        let arrival_time = self.env.now();
        let badge = match &self.counter {
            Counter::Single(server) => {
                server.request(scope)?.await?;
                None
            },
            Counter::Pool(badges) => Some(badges.request_one()?.await?),
        };
        self.stats.borrow_mut().total_time_in_queue += self.env.now() - arrival_time;

        // inverse transform of an exponential draw; 1 - u keeps the logarithm finite
        let service_delay = (1.0 - random_draw).ln() / -self.service_rate;
        self.env.timeout(service_delay)?.await?;

        match (&self.counter, badge) {
            (Counter::Single(server), _) => {
                server.release()?;
            },
            (Counter::Pool(badges), Some(badge)) => {
                badges.put_one(badge)?;
            },
            (Counter::Pool(_), None) => {},
        }
        self.stats.borrow_mut().customers_served += 1;
        Ok(())
    }
}

fn run_sim(seed: u64, num_servers: u32, service_rate: f64) -> Stats {
    let env = Environment::new();
    let shop = Rc::new(Shop {
        env: env.clone(),
        counter: Counter::new(&env, num_servers).expect("counter configuration should be valid"),
        service_rate,
        rng: Rc::new(RefCell::new(Pcg64::seed_from_u64(seed))),
        stats: Rc::default(),
    });
    Rc::clone(&shop).open().expect("shop should open");

    env.run(CLOSING_TIME).expect("simulation should complete normally");
    assert_eq!(CLOSING_TIME, env.now(), "unexpected end time");

    let stats = shop.stats.borrow().clone();
    stats
}

fn check_plausible(stats: &Stats) {
    // 4 arrivals per unit of time over 540 units is 2160 customers on average
    assert!(
        (1900..2400).contains(&stats.customers_served),
        "unexpected number of customers made it through the system: {}",
        stats.customers_served
    );
    assert!(stats.total_time_in_queue > 0.0, "some customers should have waited");
}

#[test]
fn single_server_is_reproducible() {
    let first = run_sim(11434450237083315284, 1, 6.0);
    let second = run_sim(11434450237083315284, 1, 6.0);

    check_plausible(&first);
    assert_eq!(first.customers_served, second.customers_served, "same seed should serve the same customers");
    assert_floats_near_equal!(
        first.total_time_in_queue,
        second.total_time_in_queue,
        "same seed should produce the same waiting time"
    );
}

#[test]
fn double_server_is_reproducible() {
    let first = run_sim(7082446179938253086, 2, 3.0);
    let second = run_sim(7082446179938253086, 2, 3.0);

    check_plausible(&first);
    assert_eq!(first, second, "same seed should produce the same statistics");
}

#[test]
fn triple_server_is_reproducible() {
    let first = run_sim(13009076887838060007, 3, 2.0);
    let second = run_sim(13009076887838060007, 3, 2.0);

    check_plausible(&first);
    assert_eq!(first, second, "same seed should produce the same statistics");
}

#[test]
fn more_clerks_shorten_the_line() {
    let single = run_sim(42, 1, 2.0);
    let triple = run_sim(42, 3, 2.0);
    assert!(
        triple.total_time_in_queue < single.total_time_in_queue,
        "three clerks at rate 2 should beat one clerk at rate 2"
    );
}
