/// A GPIO line as the core sees it.
///
/// Writes are register-style and assumed single-cycle, so methods take
/// `&self`; implementations keep their state in hardware registers or, on a
/// host, in atomics. Level inversion for active-low lines is the
/// implementation's business.
pub trait Pin {
    fn read(&self) -> bool;
    fn write(&self, level: bool);
    fn toggle(&self) {
        self.write(!self.read());
    }
}

impl<P: Pin> Pin for &P {
    fn read(&self) -> bool {
        (*self).read()
    }

    fn write(&self, level: bool) {
        (*self).write(level)
    }

    fn toggle(&self) {
        (*self).toggle()
    }
}
