//! Triangle LFO used for vibrato and modulation.

/// Triangle wave in `[-1, 1]`, starting at 0 and rising once `start_time`
/// has passed. Before that it is silent.
pub fn triangle(start_time: f64, frequency_hz: f64, current_time: f64) -> f64 {
    if current_time < start_time {
        return 0.0;
    }
    let x = (current_time - start_time) * frequency_hz + 0.25;
    (x - (x + 0.5).floor()).abs() * 4.0 - 1.0
}
