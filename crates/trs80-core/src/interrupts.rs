//! Named edge latches shared between the cassette, the FDC, and the CPU's
//! interrupt manager.

/// One of the four asynchronous signal lines the peripherals in this crate
/// can raise back to the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterruptLine {
    /// Cassette read pulse: positive-going edge detected.
    CassetteRisingEdge,
    /// Cassette read pulse: negative-going edge detected.
    CassetteFallingEdge,
    /// FDC command complete.
    FdcNmi,
    /// FDC motor auto-off timer expired.
    FdcMotorOffNmi,
}

/// The four named edge latches.
///
/// Each line is latched independently by a peripheral and unlatched (cleared)
/// by the CPU's interrupt manager when it observes and acts on the signal.
/// Latching is idempotent: latching an already-latched line is a no-op from
/// the CPU's point of view, matching real edge-triggered NMI lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterruptLatches {
    cassette_rising_edge: bool,
    cassette_falling_edge: bool,
    fdc_nmi: bool,
    fdc_motor_off_nmi: bool,
}

impl InterruptLatches {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latch(&mut self, line: InterruptLine) {
        *self.field_mut(line) = true;
    }

    pub fn unlatch(&mut self, line: InterruptLine) {
        *self.field_mut(line) = false;
    }

    #[must_use]
    pub fn is_latched(&self, line: InterruptLine) -> bool {
        *self.field(line)
    }

    fn field(&self, line: InterruptLine) -> &bool {
        match line {
            InterruptLine::CassetteRisingEdge => &self.cassette_rising_edge,
            InterruptLine::CassetteFallingEdge => &self.cassette_falling_edge,
            InterruptLine::FdcNmi => &self.fdc_nmi,
            InterruptLine::FdcMotorOffNmi => &self.fdc_motor_off_nmi,
        }
    }

    fn field_mut(&mut self, line: InterruptLine) -> &mut bool {
        match line {
            InterruptLine::CassetteRisingEdge => &mut self.cassette_rising_edge,
            InterruptLine::CassetteFallingEdge => &mut self.cassette_falling_edge,
            InterruptLine::FdcNmi => &mut self.fdc_nmi,
            InterruptLine::FdcMotorOffNmi => &mut self.fdc_motor_off_nmi,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latch_and_unlatch_are_independent_per_line() {
        let mut latches = InterruptLatches::new();
        latches.latch(InterruptLine::FdcNmi);
        assert!(latches.is_latched(InterruptLine::FdcNmi));
        assert!(!latches.is_latched(InterruptLine::FdcMotorOffNmi));

        latches.unlatch(InterruptLine::FdcNmi);
        assert!(!latches.is_latched(InterruptLine::FdcNmi));
    }

    #[test]
    fn double_latch_is_idempotent() {
        let mut latches = InterruptLatches::new();
        latches.latch(InterruptLine::CassetteRisingEdge);
        latches.latch(InterruptLine::CassetteRisingEdge);
        assert!(latches.is_latched(InterruptLine::CassetteRisingEdge));
    }
}
