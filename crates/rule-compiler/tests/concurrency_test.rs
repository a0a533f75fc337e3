//! 并发构建测试
//!
//! 多个线程同时构建时，最终状态必须等价于某种串行执行顺序，
//! 并且无锁读者在任何时刻看到的知识库都满足结构不变量。

use rule_compiler::{DataContext, RuleBuilder};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

fn script_for(writer: usize, count: usize) -> String {
    (0..count)
        .map(|i| {
            format!(
                r#"rule "w{}-r{}" salience {} begin x = {} end"#,
                writer,
                i,
                (i as i64 % 7) - 3,
                i
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[test]
fn test_concurrent_incremental_updates() {
    let builder = Arc::new(RuleBuilder::new(Arc::new(DataContext::new())));
    let writers = 8;
    let rules_per_writer = 25;

    let handles: Vec<_> = (0..writers)
        .map(|w| {
            let builder = Arc::clone(&builder);
            thread::spawn(move || {
                for i in 0..rules_per_writer {
                    let source = format!(
                        r#"rule "w{}-r{}" salience {} begin end"#,
                        w,
                        i,
                        (w * 31 + i * 17) % 13
                    );
                    builder.build_incremental(&source).unwrap();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let knowledge = builder.knowledge();
    assert_eq!(knowledge.len(), writers * rules_per_writer);
    assert_eq!(knowledge.version(), (writers * rules_per_writer) as u64);
    knowledge.check_invariants().unwrap();
}

#[test]
fn test_concurrent_full_builds_publish_one_complete_result() {
    let builder = Arc::new(RuleBuilder::new(Arc::new(DataContext::new())));
    let writers = 6;

    let scripts: Vec<String> = (0..writers).map(|w| script_for(w, 10 + w)).collect();

    let handles: Vec<_> = scripts
        .iter()
        .cloned()
        .map(|source| {
            let builder = Arc::clone(&builder);
            thread::spawn(move || builder.build(&source).unwrap())
        })
        .collect();

    let mut versions: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap().version).collect();
    versions.sort_unstable();
    assert_eq!(versions, (1..=writers as u64).collect::<Vec<_>>());

    // 最终结果必须恰好是某一个脚本的完整构建结果
    let knowledge = builder.knowledge();
    knowledge.check_invariants().unwrap();
    let winners: Vec<usize> = (0..writers)
        .filter(|&w| {
            let reference = RuleBuilder::new(Arc::new(DataContext::new()));
            reference.build(&scripts[w]).unwrap();
            reference.knowledge().ordered_names() == knowledge.ordered_names()
        })
        .collect();
    assert_eq!(winners.len(), 1);
}

#[test]
fn test_readers_never_observe_inconsistent_context() {
    let builder = Arc::new(RuleBuilder::new(Arc::new(DataContext::new())));
    builder.build(&script_for(0, 20)).unwrap();

    let handle = builder.handle();
    let stop = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let handle = handle.clone();
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut observed = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    let knowledge = handle.load();
                    if let Err(e) = knowledge.check_invariants() {
                        panic!("读者观察到不一致的知识库: {}", e);
                    }
                    observed += 1;
                }
                observed
            })
        })
        .collect();

    for round in 0..50usize {
        let source = format!(
            r#"
            rule "w0-r{}" salience {} begin end
            rule "extra-{}" salience {} begin end
            "#,
            round % 20,
            (round as i64 * 7) % 9 - 4,
            round,
            (round as i64 * 5) % 11 - 5
        );
        builder.build_incremental(&source).unwrap();
    }

    stop.store(true, Ordering::Relaxed);
    for r in readers {
        assert!(r.join().unwrap() > 0);
    }

    let knowledge = builder.knowledge();
    assert_eq!(knowledge.len(), 70);
    knowledge.check_invariants().unwrap();
}

#[test]
fn test_failed_builds_interleaved_with_successful_ones() {
    let builder = Arc::new(RuleBuilder::new(Arc::new(DataContext::new())));
    builder.build(&script_for(0, 5)).unwrap();

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let builder = Arc::clone(&builder);
            thread::spawn(move || {
                if i % 2 == 0 {
                    builder
                        .build_incremental(&format!(r#"rule "ok-{}" salience {} begin end"#, i, i))
                        .is_ok()
                } else {
                    builder
                        .build_incremental(r#"rule "broken" salience begin end"#)
                        .is_ok()
                }
            })
        })
        .collect();

    let successes = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();
    assert_eq!(successes, 5);

    let knowledge = builder.knowledge();
    assert_eq!(knowledge.len(), 10);
    assert_eq!(knowledge.version(), 6);
    assert!(!knowledge.contains("broken"));
    knowledge.check_invariants().unwrap();
}
