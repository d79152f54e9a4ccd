//! Walks the notification record through its producer/consumer states with a
//! trap sender that prints instead of signalling.
//!
//! Run with: cargo run --example notify_walkthrough

use cudbg_rs::notify::{NotificationChannel, NotificationPayload, TrapSender, WaitStatus};
use std::sync::Arc;
use std::thread;

struct PrintSender;

impl TrapSender for PrintSender {
    fn send_trap(&self, tid: u32) -> bool {
        println!("[sender] SIGTRAP -> thread {tid}");
        true
    }

    fn host_threads(&self) -> Vec<u32> {
        vec![1000, 1001]
    }
}

fn main() {
    let channel = Arc::new(NotificationChannel::new(Box::new(PrintSender), false));

    println!("=== plain send ===");
    channel.notify(NotificationPayload { tid: 1000, timeout: false });
    println!("pending: {}", channel.pending());

    println!("\n=== events while in flight alias ===");
    channel.notify(NotificationPayload { tid: 1000, timeout: false });
    println!("aliased: {}", channel.aliased_event());

    println!("\n=== consumer observes the stop ===");
    channel.analyze(1000, WaitStatus::Stopped(libc::SIGTRAP), false);
    println!("received: {}", channel.received());
    channel.mark_consumed();
    channel.reset_aliased_event();
    println!("pending after consume: {}", channel.pending());

    println!("\n=== blocked producer thread, then accept ===");
    channel.block();
    let producer = {
        let channel = Arc::clone(&channel);
        thread::spawn(move || {
            channel.notify(NotificationPayload { tid: 1001, timeout: false });
            println!("[producer] notify returned (buffered, no signal yet)");
        })
    };
    producer.join().expect("producer thread");
    println!("accepting...");
    channel.accept();
    println!("pending: {}", channel.pending());
}
