//! Activity and error indicators.
//!
//! An indicator counts blinks: every [`Indicator::increment`] schedules one more on/off
//! cycle, up to a limit, and every [`Indicator::spin`] plays half a cycle. Idle channels
//! show their phase through [`Indicator::relax`] instead.

use core::cell::RefCell;
use core::fmt::Debug;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use embedded_hal_02::digital::v2::OutputPin;
use embedded_hal_02::PwmPin;
use log::*;

/// Capability shared by every indicator flavour.
pub trait Indicator {
    /// Schedule one more blink.
    fn increment(&self);
    /// Show the idle pattern for the given blink phase.
    fn relax(&self, phase: bool);
    /// Override the pending half cycles.
    fn set(&self, value: u32);
    /// Play the next half cycle, if any is pending.
    fn spin(&self);
}

/// Indicator that shows nothing.
#[derive(Debug, Default, Copy, Clone)]
pub struct NullIndicator;

impl Indicator for NullIndicator {
    fn increment(&self) {}
    fn relax(&self, _phase: bool) {}
    fn set(&self, _value: u32) {}
    fn spin(&self) {}
}

/// Two half cycles per blink, saturating at `limit` blinks.
#[derive(Debug)]
struct BlinkCounter {
    counter: AtomicU32,
    limit: u32,
}

impl BlinkCounter {
    const fn new(limit: u32) -> Self {
        BlinkCounter {
            counter: AtomicU32::new(0),
            limit,
        }
    }

    fn increment(&self) {
        if (self.counter.load(Ordering::Acquire) >> 1) < self.limit {
            self.counter.fetch_add(2, Ordering::AcqRel);
        }
    }

    fn set(&self, value: u32) {
        self.counter.store(value, Ordering::Release);
    }

    /// Consume one half cycle, returning the value before the decrement.
    fn take(&self) -> Option<u32> {
        self.counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |value| value.checked_sub(1))
            .ok()
    }

    fn pending(&self) -> u32 {
        self.counter.load(Ordering::Acquire)
    }
}

/// A LED on a GPIO pin.
#[derive(Debug)]
pub struct LedIndicator<P> {
    pin: RefCell<P>,
    blinks: BlinkCounter,
    inversion: bool,
}

impl<P> LedIndicator<P>
where
    P: OutputPin,
    P::Error: Debug,
{
    /// Takes the pin and switches the LED off. With `inversion` the LED is lit by a low level.
    pub fn new(pin: P, limit: u32, inversion: bool) -> Self {
        let indicator = LedIndicator {
            pin: RefCell::new(pin),
            blinks: BlinkCounter::new(limit),
            inversion,
        };
        indicator.write(false);
        indicator
    }

    pub fn pending(&self) -> u32 {
        self.blinks.pending()
    }

    pub fn release(self) -> P {
        self.pin.into_inner()
    }

    fn write(&self, lit: bool) {
        let mut pin = self.pin.borrow_mut();
        let result = if lit ^ self.inversion {
            pin.set_high()
        } else {
            pin.set_low()
        };
        if let Err(error) = result {
            warn!("indicator pin: {:?}", error);
        }
    }
}

impl<P> Indicator for LedIndicator<P>
where
    P: OutputPin,
    P::Error: Debug,
{
    fn increment(&self) {
        self.blinks.increment();
    }

    fn relax(&self, phase: bool) {
        self.write(phase);
    }

    fn set(&self, value: u32) {
        self.blinks.set(value);
    }

    fn spin(&self) {
        if let Some(previous) = self.blinks.take() {
            self.write(previous & 1 == 0);
        }
    }
}

/// Brightness curve of one breath, full scale 255.
const BREATH: [u8; 100] = [
    255, 254, 253, 252, 251, 248, 246, 242, 239, 235, 230, 225, 220, 214, 208, 202, 196, 189,
    182, 174, 167, 159, 151, 143, 135, 128, 121, 113, 105, 97, 89, 82, 74, 67, 60, 54, 48, 42,
    36, 31, 26, 21, 17, 14, 10, 8, 5, 4, 3, 2, 1, 2, 3, 4, 5, 8, 10, 14, 17, 21, 26, 31, 36, 42,
    48, 54, 60, 67, 74, 82, 89, 97, 105, 113, 121, 128, 135, 143, 151, 159, 167, 174, 182, 189,
    196, 202, 208, 214, 220, 225, 230, 235, 239, 242, 246, 248, 251, 252, 253, 254,
];

/// A LED on a PWM channel. Activity blinks at full brightness, an idle channel breathes.
#[derive(Debug)]
pub struct PwmIndicator<P> {
    pwm: RefCell<P>,
    blinks: BlinkCounter,
    step: AtomicUsize,
    stride: usize,
}

impl<P> PwmIndicator<P>
where
    P: PwmPin<Duty = u16>,
{
    pub fn new(mut pwm: P, limit: u32) -> Self {
        pwm.set_duty(0);
        pwm.enable();
        PwmIndicator {
            pwm: RefCell::new(pwm),
            blinks: BlinkCounter::new(limit),
            step: AtomicUsize::new(0),
            stride: 1,
        }
    }

    /// Table entries advanced per relax call. One breath takes `BREATH.len() / stride`
    /// calls, rounded up; the default of 1 plays every entry.
    pub fn with_breath_stride(mut self, stride: usize) -> Self {
        self.stride = stride.clamp(1, BREATH.len());
        self
    }

    pub fn pending(&self) -> u32 {
        self.blinks.pending()
    }

    pub fn release(self) -> P {
        let mut pwm = self.pwm.into_inner();
        pwm.disable();
        pwm
    }
}

impl<P> Indicator for PwmIndicator<P>
where
    P: PwmPin<Duty = u16>,
{
    fn increment(&self) {
        self.blinks.increment();
    }

    /// Advance the breath by one stride. A finished breath is restarted by the next set phase.
    fn relax(&self, phase: bool) {
        let mut step = self.step.load(Ordering::Acquire);
        if step >= BREATH.len() {
            if !phase {
                return;
            }
            step = 0;
        }
        self.step.store(step + self.stride, Ordering::Release);

        let mut pwm = self.pwm.borrow_mut();
        let duty = u32::from(pwm.get_max_duty()) * u32::from(BREATH[step]) / 255;
        pwm.set_duty(duty as u16);
    }

    fn set(&self, value: u32) {
        self.blinks.set(value);
    }

    fn spin(&self) {
        if let Some(previous) = self.blinks.take() {
            let mut pwm = self.pwm.borrow_mut();
            let duty = if (previous - 1) & 1 == 1 {
                0
            } else {
                pwm.get_max_duty()
            };
            pwm.set_duty(duty);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockPin, MockPwm};
    use test_log::test;

    #[test]
    fn led_starts_dark() {
        let pin = MockPin::default();
        let _led = LedIndicator::new(pin.clone(), 4, false);
        assert_eq!(pin.level.get(), Some(false));

        let inverted = MockPin::default();
        let _led = LedIndicator::new(inverted.clone(), 4, true);
        assert_eq!(inverted.level.get(), Some(true));
    }

    #[test]
    fn led_blinks_once_per_increment() {
        let pin = MockPin::default();
        let led = LedIndicator::new(pin.clone(), 4, false);
        led.increment();
        assert_eq!(led.pending(), 2);

        led.spin();
        assert_eq!(pin.level.get(), Some(true));
        led.spin();
        assert_eq!(pin.level.get(), Some(false));

        // nothing pending, the pin is left alone
        pin.level.set(None);
        led.spin();
        assert_eq!(pin.level.get(), None);
    }

    #[test]
    fn led_increment_saturates() {
        let led = LedIndicator::new(MockPin::default(), 3, false);
        for _ in 0..10 {
            led.increment();
        }
        assert_eq!(led.pending(), 6);
    }

    #[test]
    fn led_set_overrides_counter() {
        let pin = MockPin::default();
        let led = LedIndicator::new(pin.clone(), 3, false);
        led.set(1);
        led.spin();
        // odd counter ends on the dark half
        assert_eq!(pin.level.get(), Some(false));
        assert_eq!(led.pending(), 0);
    }

    #[test]
    fn led_relax_follows_phase() {
        let pin = MockPin::default();
        let led = LedIndicator::new(pin.clone(), 3, true);
        led.relax(true);
        assert_eq!(pin.level.get(), Some(false));
        led.relax(false);
        assert_eq!(pin.level.get(), Some(true));
        assert_eq!(led.release().level.get(), Some(true));
    }

    #[test]
    fn pwm_blinks_at_full_scale() {
        let pwm = MockPwm::default();
        let indicator = PwmIndicator::new(pwm.clone(), 2);
        assert!(pwm.enabled.get());
        indicator.increment();
        indicator.spin();
        assert_eq!(pwm.duty.get(), 0);
        indicator.spin();
        assert_eq!(pwm.duty.get(), 1000);
        assert_eq!(indicator.pending(), 0);
    }

    #[test]
    fn pwm_breathes_when_relaxed() {
        let pwm = MockPwm::default();
        let indicator = PwmIndicator::new(pwm.clone(), 2);
        indicator.relax(true);
        assert_eq!(pwm.duty.get(), 1000);
        for _ in 1..=50 {
            indicator.relax(false);
        }
        assert_eq!(pwm.duty.get(), 1000 / 255);
        for _ in 51..BREATH.len() {
            indicator.relax(false);
        }
        // finished, held until the next set phase
        pwm.duty.set(7);
        indicator.relax(false);
        assert_eq!(pwm.duty.get(), 7);
        indicator.relax(true);
        assert_eq!(pwm.duty.get(), 1000);
        assert!(!indicator.release().enabled.get());
    }

    #[test]
    fn breath_stride_shortens_the_breath() {
        let pwm = MockPwm::default();
        let indicator = PwmIndicator::new(pwm.clone(), 2).with_breath_stride(25);
        let mut duties = std::vec::Vec::new();
        for _ in 0..4 {
            indicator.relax(false);
            duties.push(pwm.duty.get());
        }
        assert_eq!(duties, std::vec![1000, 501, 3, 501]);

        pwm.duty.set(7);
        indicator.relax(false);
        assert_eq!(pwm.duty.get(), 7);
        indicator.relax(true);
        assert_eq!(pwm.duty.get(), 1000);

        // out of range strides are clamped
        let pwm = MockPwm::default();
        let indicator = PwmIndicator::new(pwm.clone(), 2).with_breath_stride(0);
        indicator.relax(true);
        indicator.relax(false);
        assert_eq!(pwm.duty.get(), 996);
    }

    #[test]
    fn null_indicator_is_inert() {
        let indicator = NullIndicator;
        indicator.increment();
        indicator.set(4);
        indicator.relax(true);
        indicator.spin();
    }
}
