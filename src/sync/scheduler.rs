use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Scheduled,
    Fetching,
}

enum Command {
    RefetchNow,
}

struct Timer {
    generation: u64,
    commands: mpsc::UnboundedSender<Command>,
}

#[derive(Default)]
struct TimerSlot {
    active: Option<Timer>,
    next_generation: u64,
}

// At most one armed deadline and one running tick; triggers that pile up
// while a tick runs collapse into one.
pub struct RefetchScheduler {
    interval: Duration,
    slot: Arc<Mutex<TimerSlot>>,
    phase: Arc<watch::Sender<SyncPhase>>,
}

impl RefetchScheduler {
    pub fn new(interval: Duration) -> Self {
        let (phase, _) = watch::channel(SyncPhase::Idle);
        Self {
            interval: interval.max(Duration::from_millis(1)),
            slot: Arc::new(Mutex::new(TimerSlot::default())),
            phase: Arc::new(phase),
        }
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    pub fn start<F, Fut>(&self, tick: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let first_deadline = Instant::now() + self.interval;
        let generation = {
            let mut slot = self.slot.lock();
            slot.next_generation += 1;
            let generation = slot.next_generation;
            slot.active = Some(Timer {
                generation,
                commands: tx,
            });
            self.phase.send_replace(SyncPhase::Scheduled);
            generation
        };

        tracing::debug!(interval_ms = self.interval.as_millis() as u64, "refetch scheduler started");
        tokio::spawn(run_loop(
            self.interval,
            first_deadline,
            generation,
            Arc::clone(&self.slot),
            Arc::clone(&self.phase),
            rx,
            tick,
        ));
    }

    pub fn stop(&self) {
        let mut slot = self.slot.lock();
        if slot.active.take().is_some() {
            tracing::debug!("refetch scheduler stopped");
        }
        self.phase.send_replace(SyncPhase::Idle);
    }

    pub fn refetch_now(&self) -> bool {
        let slot = self.slot.lock();
        match slot.active.as_ref() {
            Some(timer) => timer.commands.send(Command::RefetchNow).is_ok(),
            None => false,
        }
    }
}

impl Drop for RefetchScheduler {
    fn drop(&mut self) {
        self.slot.lock().active = None;
    }
}

async fn run_loop<F, Fut>(
    interval: Duration,
    mut deadline: Instant,
    generation: u64,
    slot: Arc<Mutex<TimerSlot>>,
    phase: Arc<watch::Sender<SyncPhase>>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    tick: F,
) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        tokio::select! {
            biased;
            command = commands.recv() => match command {
                Some(Command::RefetchNow) => {
                    while commands.try_recv().is_ok() {}
                    tracing::trace!("out-of-schedule refetch");
                }
                None => break,
            },
            _ = sleep_until(deadline) => {}
        }

        if !set_phase(&slot, &phase, generation, SyncPhase::Fetching) {
            break;
        }
        tick().await;
        deadline = Instant::now() + interval;
        if !set_phase(&slot, &phase, generation, SyncPhase::Scheduled) {
            break;
        }
    }
}

fn set_phase(
    slot: &Mutex<TimerSlot>,
    phase: &watch::Sender<SyncPhase>,
    generation: u64,
    next: SyncPhase,
) -> bool {
    let slot = slot.lock();
    match slot.active.as_ref() {
        Some(timer) if timer.generation == generation => {
            phase.send_replace(next);
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> futures::future::Ready<()> + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let tick_count = Arc::clone(&count);
        (count, move || {
            tick_count.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(())
        })
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_once_per_interval() {
        let scheduler = RefetchScheduler::new(Duration::from_millis(1500));
        let (count, tick) = counter();
        scheduler.start(tick);
        assert_eq!(scheduler.phase(), SyncPhase::Scheduled);

        tokio::time::advance(Duration::from_millis(1499)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_millis(2)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(1500)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn refetch_now_resets_the_deadline() {
        let scheduler = RefetchScheduler::new(Duration::from_millis(1500));
        let (count, tick) = counter();
        scheduler.start(tick);

        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(scheduler.refetch_now());
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // the original deadline at 1500ms no longer fires
        tokio::time::advance(Duration::from_millis(1000)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(501)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn piled_up_triggers_collapse() {
        let scheduler = RefetchScheduler::new(Duration::from_secs(10));
        let (count, tick) = counter();
        scheduler.start(tick);

        for _ in 0..5 {
            assert!(scheduler.refetch_now());
        }
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_goes_idle_and_ignores_triggers() {
        let scheduler = RefetchScheduler::new(Duration::from_millis(100));
        let (count, tick) = counter();
        scheduler.start(tick);
        scheduler.stop();

        assert_eq!(scheduler.phase(), SyncPhase::Idle);
        assert!(!scheduler.refetch_now());
        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_keeps_a_single_timer() {
        let scheduler = RefetchScheduler::new(Duration::from_millis(100));
        let (count, tick) = counter();
        let tick = Arc::new(tick);
        for _ in 0..3 {
            let tick = Arc::clone(&tick);
            scheduler.start(move || (tick.as_ref())());
        }
        settle().await;

        tokio::time::advance(Duration::from_millis(101)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn phase_reports_fetching_during_tick() {
        let scheduler = RefetchScheduler::new(Duration::from_millis(100));
        let (release_tx, release_rx) = watch::channel(false);
        scheduler.start(move || {
            let mut release = release_rx.clone();
            async move {
                let _ = release.wait_for(|released| *released).await;
            }
        });

        assert!(scheduler.refetch_now());
        settle().await;
        assert_eq!(scheduler.phase(), SyncPhase::Fetching);

        release_tx.send_replace(true);
        settle().await;
        assert_eq!(scheduler.phase(), SyncPhase::Scheduled);
    }
}
