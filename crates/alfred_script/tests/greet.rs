use alfred_core::Helper;
use alfred_script::{script_pool, ModuleRegistry, PoolConfig, ScriptFunction};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

const BLOCKED: Duration = Duration::from_millis(150);
const UNBLOCKED: Duration = Duration::from_secs(5);

const GREET: &str = r#"
    function updateHelpers(helpers) {
        const greeting = require("greeting");
        console.info("greeting", helpers.length, "helpers");
        return helpers.concat([{ name: "greeting", value: greeting.hello("alfred") }]);
    }
"#;

fn modules() -> ModuleRegistry {
    let mut modules = ModuleRegistry::new();
    modules.register(
        "greeting",
        "exports.hello = function (name) { return 'hello ' + name; };",
    );
    modules
}

#[test]
fn greet_appends_one_helper() {
    let pool = Arc::new(script_pool(&PoolConfig::new(1, 4), modules()).unwrap());
    let greet = ScriptFunction::new(pool.clone(), "greet.js", GREET).unwrap();

    assert!(greet.has_update_helpers());
    assert!(!greet.has_alfred());

    let helpers = greet.update_helpers(&[]).unwrap();
    assert_eq!(helpers, vec![Helper::new("greeting", "hello alfred")]);

    pool.shutdown();
    assert_eq!(pool.stats().live, 0);
}

#[test]
fn greet_serializes_on_single_runtime() {
    let pool = Arc::new(script_pool(&PoolConfig::new(1, 1), modules()).unwrap());
    let greet = ScriptFunction::new(pool.clone(), "greet.js", GREET).unwrap();
    let (tx, rx) = mpsc::channel();

    // Hold the only runtime so the calls have to queue behind it.
    let held = pool.acquire().unwrap();
    thread::scope(|scope| {
        for _ in 0..2 {
            let tx = tx.clone();
            let greet = &greet;
            scope.spawn(move || tx.send(greet.update_helpers(&[])).unwrap());
        }
        assert!(rx.recv_timeout(BLOCKED).is_err());

        drop(held);
        for _ in 0..2 {
            let helpers = rx.recv_timeout(UNBLOCKED).unwrap().unwrap();
            assert_eq!(helpers, vec![Helper::new("greeting", "hello alfred")]);
        }
    });

    // Both calls shared the one runtime.
    let stats = pool.stats();
    assert_eq!(stats.live, 1);
    assert_eq!(stats.idle, 1);
}

#[test]
fn functions_share_one_pool_across_threads() {
    let pool = Arc::new(script_pool(&PoolConfig::new(1, 3), modules()).unwrap());
    let greet = Arc::new(ScriptFunction::new(pool.clone(), "greet.js", GREET).unwrap());
    let count = "function updateHelpers(h) {
        return h.map(x => ({ name: x.name, value: x.value + 1 }));
    }";
    let counter = Arc::new(ScriptFunction::new(pool.clone(), "count.js", count).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let greet = Arc::clone(&greet);
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                for _ in 0..10 {
                    if i % 2 == 0 {
                        assert_eq!(greet.update_helpers(&[]).unwrap().len(), 1);
                    } else {
                        let out = counter.update_helpers(&[Helper::new("n", i)]).unwrap();
                        assert_eq!(out, vec![Helper::new("n", i + 1)]);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let stats = pool.stats();
    assert!(stats.live <= 3);
    assert_eq!(stats.idle, stats.live);
}
