use desproc::{Environment, Error, Event, Process, Result, Scope, Server, Store, ValueEvent, ValueStatus};
use std::cell::RefCell;
use std::rc::Rc;

/// A server whose only guarded operation takes a fixed amount of time.
#[derive(Clone)]
struct Workbench {
    server: Server,
    env: Environment,
}

impl Workbench {
    fn new(env: &Environment) -> Self {
        Self {
            server: Server::new(env),
            env: env.clone(),
        }
    }

    fn do_something(&self, scope: Scope) -> Result<Event> {
        let env = self.env.clone();
        self.server.server_action(scope, move |_| async move { env.timeout(1000.0)?.await })
    }
}

#[test]
fn holder_may_run_server_actions() {
    let env = Environment::new();
    let bench = Workbench::new(&env);
    let outcome = Rc::new(RefCell::new(None));

    let user = bench.clone();
    let slot = Rc::clone(&outcome);
    let main = env
        .process(move |scope| async move {
            user.server.request(scope)?.await?;
            *slot.borrow_mut() = Some(user.do_something(scope).is_ok());
            Ok(())
        })
        .unwrap();
    env.run_until(&main).unwrap();

    assert_eq!(Some(true), *outcome.borrow(), "holder should be allowed to act");
}

#[test]
fn action_before_the_grant_fires_is_rejected() {
    let env = Environment::new();
    let bench = Workbench::new(&env);
    let outcome = Rc::new(RefCell::new(None));

    let user = bench.clone();
    let slot = Rc::clone(&outcome);
    let main = env
        .process(move |scope| async move {
            // requested, but never waited for
            user.server.request(scope)?;
            *slot.borrow_mut() = Some(user.do_something(scope));
            Ok(())
        })
        .unwrap();
    env.run_until(&main).unwrap();

    let outcome = outcome.borrow_mut().take();
    assert!(
        matches!(outcome, Some(Err(Error::InvalidServerAction { .. }))),
        "action should be rejected before the grant fires"
    );
}

#[test]
fn action_on_a_server_held_by_someone_else_is_rejected() {
    let env = Environment::new();
    let bench = Workbench::new(&env);

    let owner = bench.clone();
    let clock = env.clone();
    let owner_process = Process::new(&env, move |scope| async move {
        owner.server.request(scope)?.await?;
        clock.timeout(50.0)?.await?;
        owner.server.release()?.await?;
        Ok(())
    });
    env.spawn(&owner_process).unwrap();

    let intruder = bench.clone();
    let rejected = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&rejected);
    let fail_process = env
        .process(move |scope| async move {
            *slot.borrow_mut() = Some(intruder.do_something(scope));
            Ok(())
        })
        .unwrap();
    env.run_until(&fail_process).unwrap();

    let rejected = rejected.borrow_mut().take();
    match rejected {
        Some(Err(Error::InvalidServerAction { caller, holder })) => {
            assert_ne!(Some(caller), holder, "caller should not be the holder");
            assert_eq!(Some(owner_process.scope()), holder, "owner should hold the server");
        },
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn request_waits_for_release() {
    let env = Environment::new();
    let server = Server::new(&env);

    let owner = server.clone();
    let clock = env.clone();
    env.process(move |scope| async move {
        owner.request(scope)?.await?;
        clock.timeout(100.0)?.await?;
        owner.release()?.await?;
        Ok(())
    })
    .unwrap();

    let granted_at = Rc::new(RefCell::new(None));
    let waiter = server.clone();
    let clock = env.clone();
    let slot = Rc::clone(&granted_at);
    env.process(move |scope| async move {
        waiter.request(scope)?.await?;
        *slot.borrow_mut() = Some(clock.now());
        Ok(())
    })
    .unwrap();
    env.run_all().unwrap();

    assert_eq!(Some(100.0), *granted_at.borrow(), "second request should be granted at the release");
    assert!(server.is_blocked(), "second holder never released");
}

#[test]
fn holder_can_wait_for_its_action() {
    let env = Environment::new();
    let bench = Workbench::new(&env);

    let owner = bench.clone();
    let clock = env.clone();
    env.process(move |scope| async move {
        owner.server.request(scope)?.await?;
        clock.timeout(10.0)?.await?;
        owner.server.release()?.await?;
        Ok(())
    })
    .unwrap();

    let finished_at = Rc::new(RefCell::new(0.0));
    let worker = bench.clone();
    let clock = env.clone();
    let slot = Rc::clone(&finished_at);
    let main = env
        .process(move |scope| async move {
            worker.server.request(scope)?.await?;
            worker.do_something(scope)?.await?;
            *slot.borrow_mut() = clock.now();
            Ok(())
        })
        .unwrap();
    env.run_until(&main).unwrap();

    assert_eq!(1010.0, *finished_at.borrow(), "action should end 1000 after the grant at 10");
}

#[test]
fn concurrent_requests_are_granted_in_order() {
    let env = Environment::new();
    let bench = Workbench::new(&env);
    let granted = Rc::new(RefCell::new(Vec::new()));

    for _ in 0..5 {
        let user = bench.clone();
        let clock = env.clone();
        let log = Rc::clone(&granted);
        env.process(move |scope| async move {
            user.server.request(scope)?.await?;
            log.borrow_mut().push(clock.now());
            user.do_something(scope)?.await?;
            clock.timeout(100.0)?.await?;
            user.server.release()?.await?;
            Ok(())
        })
        .unwrap();
    }
    env.run(5000.0).unwrap();

    assert_eq!(
        vec![0.0, 1100.0, 2200.0, 3300.0, 4400.0],
        *granted.borrow(),
        "grants should follow request order"
    );
}

#[test]
fn releasing_an_idle_server_is_rejected() {
    let env = Environment::new();
    let server = Server::new(&env);
    assert!(
        matches!(server.release(), Err(Error::InvalidServerRelease)),
        "idle server cannot be released"
    );
}

fn full_store(env: &Environment) -> Store<u32> {
    let store = Store::new(env, 10).unwrap();
    store.initialize(0..10).unwrap();
    store
}

#[test]
fn uninitialized_store_is_empty() {
    let env = Environment::new();
    let store: Store<()> = Store::new(&env, 10).unwrap();
    assert_eq!(0, store.number_of_available_items(), "store should start empty");
    assert_eq!(10, store.capacity(), "unexpected capacity");
}

#[test]
fn initialized_store_holds_its_stock() {
    let env = Environment::new();
    assert_eq!(10, full_store(&env).number_of_available_items(), "store should hold its stock");
}

#[test]
fn initializing_twice_is_rejected() {
    let env = Environment::new();
    let store = Store::new(&env, 10).unwrap();
    store.initialize([(); 4]).unwrap();
    assert!(
        matches!(store.initialize([(); 4]), Err(Error::StoreAlreadyInitialized)),
        "second initialization should be rejected"
    );
    assert!(
        matches!(
            Store::new(&env, 2).unwrap().initialize([(); 3]),
            Err(Error::CapacityExceeded { items: 3, capacity: 2 })
        ),
        "overfilling should be rejected"
    );
}

#[test]
fn process_gets_an_item() {
    let env = Environment::new();
    let store = full_store(&env);
    let received = Rc::new(RefCell::new(None));

    let shelf = store.clone();
    let slot = Rc::clone(&received);
    env.process(move |_| async move {
        *slot.borrow_mut() = Some(shelf.request_one()?.await?);
        Ok(())
    })
    .unwrap();
    env.run_all().unwrap();

    assert_eq!(Some(0), *received.borrow(), "oldest item should be handed out");
    assert_eq!(9, store.number_of_available_items(), "one item should be gone");
}

#[test]
fn process_puts_an_item() {
    let env = Environment::new();
    let store = Store::new(&env, 10).unwrap();
    let shelf = store.clone();
    env.process(move |_| async move { shelf.put_one("crate")?.await.map(drop) }).unwrap();
    env.run_all().unwrap();

    assert_eq!(1, store.number_of_available_items(), "item should be stored");
}

#[test]
fn put_into_a_full_store_stays_unfulfilled() {
    let env = Environment::new();
    let store = full_store(&env);
    let request: Rc<RefCell<Option<ValueEvent<u32>>>> = Rc::default();

    let shelf = store.clone();
    let slot = Rc::clone(&request);
    env.process(move |_| async move {
        let put = shelf.put_one(99)?;
        *slot.borrow_mut() = Some(put.clone());
        put.await.map(drop)
    })
    .unwrap();
    env.run_all().unwrap();

    let request = request.borrow_mut().take().unwrap();
    assert_eq!(None, request.value(), "put should not be fulfilled");
    assert_eq!(10, store.number_of_available_items(), "store should stay full");
}

#[test]
fn get_is_fulfilled_once_an_item_arrives() {
    let env = Environment::new();
    let store: Store<u32> = Store::new(&env, 10).unwrap();
    let received = Rc::new(RefCell::new(None));

    let shelf = store.clone();
    let clock = env.clone();
    let slot = Rc::clone(&received);
    env.process(move |_| async move {
        let item = shelf.request_one()?.await?;
        *slot.borrow_mut() = Some((item, clock.now()));
        Ok(())
    })
    .unwrap();

    let shelf = store.clone();
    let clock = env.clone();
    env.process(move |_| async move {
        clock.timeout(10.0)?.await?;
        shelf.put_one(7)?;
        Ok(())
    })
    .unwrap();
    env.run_all().unwrap();

    assert_eq!(Some((7, 10.0)), *received.borrow(), "get should be served by the later put");
    assert_eq!(0, store.number_of_available_items(), "item should have passed straight through");
}

#[test]
fn put_is_fulfilled_once_an_item_leaves() {
    let env = Environment::new();
    let store = full_store(&env);
    let put = store.put_one(10).unwrap();

    let shelf = store.clone();
    let clock = env.clone();
    env.process(move |_| async move {
        clock.timeout(50.0)?.await?;
        shelf.request_one()?;
        Ok(())
    })
    .unwrap();
    env.run_all().unwrap();

    assert_eq!(ValueStatus::Available, put.value_status(), "put should be fulfilled");
    assert_eq!(Some(50.0), put.event().scheduled_time(), "put should complete when the get frees a slot");
    assert_eq!(10, store.number_of_available_items(), "store should be full again");
}
