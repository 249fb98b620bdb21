use std::{
    fmt::Display,
    io::{stdout, Write},
    time::Instant,
};

/// Colour code used for numbers in progress output.
pub const NUM_CS: i32 = 36;

pub fn ansi<T: Display, U: Display>(x: T, y: U) -> String {
    format!("\x1b[{y}m{x}\x1b[0m")
}

pub fn report_batch_progress(
    epoch: usize,
    batches: usize,
    finished_batches: usize,
    epoch_timer: &Instant,
    samples: usize,
) {
    let epoch_time = epoch_timer.elapsed().as_secs_f32();
    let pct = finished_batches as f32 / batches as f32;
    let samples_per_sec = samples as f32 / epoch_time;

    let seconds = epoch_time / pct - epoch_time;

    print!(
        "epoch {} [{}% ({}/{} batches, {} samples/sec)]\n\
        Estimated time to end of epoch: {}s     \x1b[F",
        ansi(epoch, NUM_CS),
        ansi(format!("{:.1}", pct * 100.0), 35),
        ansi(finished_batches, NUM_CS),
        ansi(batches, NUM_CS),
        ansi(format!("{samples_per_sec:.0}"), NUM_CS),
        ansi(format!("{seconds:.1}"), NUM_CS),
    );
    let _ = stdout().flush();
}

pub struct EpochReport {
    pub epoch: usize,
    pub train_loss: f32,
    pub train_accuracy: f32,
    pub val_loss: f32,
    pub val_accuracy: f32,
    pub epoch_time: f32,
    pub total_time: f32,
}

pub fn report_epoch_finished(report: &EpochReport) {
    println!(
        "epoch {} | time {}s | train loss {} | train acc {} | val loss {} | val acc {} | total time {}s",
        ansi(report.epoch, NUM_CS),
        ansi(format!("{:.1}", report.epoch_time), NUM_CS),
        ansi(format!("{:.6}", report.train_loss), NUM_CS),
        ansi(format!("{:.4}", report.train_accuracy), NUM_CS),
        ansi(format!("{:.6}", report.val_loss), NUM_CS),
        ansi(format!("{:.4}", report.val_accuracy), NUM_CS),
        ansi(format!("{:.1}", report.total_time), NUM_CS),
    );
}

pub fn report_new_best(accuracy: f32, path: &str) {
    println!("Saved new best model ({}) to {}", ansi(format!("{accuracy:.4}"), 32), ansi(path, NUM_CS));
}

pub fn report_time_left(finished_epochs: usize, total_epochs: usize, total_time: f32) {
    let pct = finished_epochs as f32 / total_epochs as f32;
    let time_left = total_time / pct - total_time;

    let (hours, minutes, seconds) = seconds_to_hms(time_left as u32);

    println!(
        "Estimated time remaining in training: {}h {}m {}s",
        ansi(hours, NUM_CS),
        ansi(minutes, NUM_CS),
        ansi(seconds, NUM_CS),
    );
}

pub fn seconds_to_hms(mut seconds: u32) -> (u32, u32, u32) {
    let mut minutes = seconds / 60;
    let hours = minutes / 60;
    seconds -= minutes * 60;
    minutes -= hours * 60;

    (hours, minutes, seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hms() {
        assert_eq!(seconds_to_hms(0), (0, 0, 0));
        assert_eq!(seconds_to_hms(3725), (1, 2, 5));
    }

    #[test]
    fn ansi_wraps_value() {
        assert_eq!(ansi(5, 36), "\x1b[36m5\x1b[0m");
    }
}
