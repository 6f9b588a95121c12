//! Control of the AFE wake-up timer

use log::{debug, warn};

use crate::driver::{ChipDriver, WakeupTimerConfig};
use crate::error::ExperimentError;
use crate::registers::SeqId;

/// Sleep phase the chip requires between two sequences
pub const SLEEP_TICKS: u32 = 1;


/// When each sequence of a method fires
///
/// `dwell` holds, per sequence id, how long the output it sets is held
/// before the next entry fires, in seconds. `overhead` is subtracted from
/// the resulting tick count to account for helper sequences that run in
/// between; zero dwell means "as soon as possible".
#[derive(Clone, Debug, PartialEq)]
pub struct Schedule {
    pub order: Vec<SeqId>,
    pub dwell: [f32; 4],
    pub overhead: [u32; 4],
}

impl Schedule {
    pub fn new(order: &[SeqId]) -> Self {
        Schedule { order: order.to_vec(), dwell: [0.0; 4], overhead: [0; 4] }
    }

    pub fn dwell(mut self, id: SeqId, seconds: f32) -> Self {
        self.dwell[id as usize] = seconds;
        self
    }

    pub fn overhead(mut self, id: SeqId, ticks: u32) -> Self {
        self.overhead[id as usize] = ticks;
        self
    }
}


/// Drives the wake-up timer of the AFE
///
/// The timer must be stopped on every exit path of a run before the AFE is
/// powered down; [`WakeupTimerController::stop`] is unconditional and may
/// be called any number of times.
#[derive(Debug)]
pub struct WakeupTimerController {
    lfosc: f32,
    attempts: u32,
    armed: bool,
}

impl WakeupTimerController {

    /// Controller for a calibrated LFOSC of `lfosc` Hz. Wake-up probes are
    /// capped at `attempts`.
    pub fn new(lfosc: f32, attempts: u32) -> Self {
        WakeupTimerController { lfosc, attempts, armed: false }
    }

    /// Timer ticks in `seconds`
    pub fn ticks(&self, seconds: f32) -> u32 {
        (self.lfosc * seconds).round().max(0.0) as u32
    }

    /// Translate a schedule into a timer programme
    pub fn program(&self, schedule: &Schedule) -> WakeupTimerConfig {
        let mut wake = [SLEEP_TICKS; 4];

        for id in schedule.order.iter() {
            let i = *id as usize;
            let ticks = self.ticks(schedule.dwell[i]);
            wake[i] = ticks.saturating_sub(schedule.overhead[i]).max(SLEEP_TICKS);
        }

        WakeupTimerConfig {
            enabled: true,
            order: schedule.order.clone(),
            sleep: [SLEEP_TICKS; 4],
            wake,
        }
    }

    /// Arm the timer with `schedule`
    pub fn start<D: ChipDriver + ?Sized>(&mut self, driver: &mut D, schedule: &Schedule)
        -> Result<WakeupTimerConfig, ExperimentError> {

        if !driver.wake(self.attempts) {
            warn!("AFE did not wake up, timer not armed");
            return Err(ExperimentError::WakeupFailed { attempts: self.attempts, running: false });
        }

        let cfg = self.program(schedule);
        debug!("Arming wake-up timer: order {:?}, wake {:?}", cfg.order, cfg.wake);
        driver.configure_wakeup_timer(&cfg);
        self.armed = true;

        Ok(cfg)
    }

    /// Disarm the timer
    pub fn stop<D: ChipDriver + ?Sized>(&mut self, driver: &mut D) {
        driver.configure_wakeup_timer(&WakeupTimerConfig::disabled());
        if self.armed {
            debug!("Wake-up timer stopped");
        }
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }
}


#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn sweep_schedule_accounts_for_adc_sequence() {
        let timer = WakeupTimerController::new(32_000.0, 10);
        let schedule = Schedule::new(&[SeqId::Seq0, SeqId::Seq2, SeqId::Seq1, SeqId::Seq2])
            .dwell(SeqId::Seq0, 0.01)
            .dwell(SeqId::Seq1, 0.01)
            .overhead(SeqId::Seq0, 3)
            .overhead(SeqId::Seq1, 3);

        let cfg = timer.program(&schedule);
        assert_eq!(cfg.wake[0], 317);
        assert_eq!(cfg.wake[1], 317);
        assert_eq!(cfg.wake[2], 1);
        assert_eq!(cfg.sleep, [1; 4]);

        // one full step takes the requested 320 ticks
        let step = cfg.period(SeqId::Seq0) + cfg.period(SeqId::Seq2);
        assert_eq!(step, 320);
    }

    #[test]
    fn ticks_round() {
        let timer = WakeupTimerController::new(32_768.0, 10);
        assert_eq!(timer.ticks(0.1), 3277);
        assert_eq!(timer.ticks(0.0), 0);
    }

    #[test]
    fn tiny_dwell_is_clamped() {
        let timer = WakeupTimerController::new(100.0, 10);
        let schedule = Schedule::new(&[SeqId::Seq1]).dwell(SeqId::Seq1, 0.001).overhead(SeqId::Seq1, 3);
        assert_eq!(timer.program(&schedule).wake[1], SLEEP_TICKS);
    }
}
