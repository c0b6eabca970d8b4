//! 共享栈协程演示
//!
//! 两个协程交替打印各自的计数

use std::process;

use costack::config::{LIB_NAME, VERSION};
use costack::{CoroutineStatus, Scheduler};

fn counter(start: i32) -> impl FnOnce(&Scheduler) + 'static {
    move |s| {
        for i in 0..5 {
            if let Some(id) = s.running_id() {
                println!("coroutine {} : {}", id, start + i);
            }
            s.yield_now();
        }
    }
}

fn main() {
    println!("{} {}", LIB_NAME, VERSION);

    let s = match Scheduler::open() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    let co1 = s.create(counter(0));
    let co2 = s.create(counter(100));

    println!("main start");
    while s.status(co1) != CoroutineStatus::Dead && s.status(co2) != CoroutineStatus::Dead {
        s.resume(co1);
        s.resume(co2);
    }
    println!("main end");

    s.close();
}
