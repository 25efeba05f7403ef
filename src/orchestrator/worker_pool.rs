use crossbeam_channel::bounded;
use std::thread;

/// Runs `work` over every item on a bounded pool of OS threads. The pool
/// drains even when individual invocations panic-free fail; error handling
/// belongs to the closure. Items are processed in channel order with no
/// ordering guarantee across workers.
pub fn run_bounded<T, F>(items: &[T], workers: usize, work: F)
where
    T: Sync,
    F: Fn(&T) + Sync,
{
    if items.is_empty() {
        return;
    }
    let workers = workers.clamp(1, items.len());
    let (sender, receiver) = bounded::<usize>(items.len());
    for i in 0..items.len() {
        sender.send(i).expect("work queue sized to item count");
    }
    drop(sender);

    thread::scope(|scope| {
        for _ in 0..workers {
            let receiver = receiver.clone();
            let work = &work;
            scope.spawn(move || {
                while let Ok(i) = receiver.recv() {
                    work(&items[i]);
                }
            });
        }
    });
}
