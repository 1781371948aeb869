//! Werte, die erst im Laufe des Handshakes bekannt werden
//!
//! Zugriff vor dem Setzen ist ein Fehler statt eines stillen Defaults.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DelayedError {
    #[error("'{0}' wurde noch nicht gesetzt")]
    NichtGesetzt(&'static str),

    #[error("'{0}' wurde bereits gesetzt")]
    BereitsGesetzt(&'static str),
}

/// Einmal setzbarer Wert
#[derive(Debug)]
pub struct Delayed<T> {
    name: &'static str,
    value: Option<T>,
}

impl<T> Delayed<T> {
    pub fn new(name: &'static str) -> Self {
        Self { name, value: None }
    }

    pub fn set(&mut self, value: T) -> Result<(), DelayedError> {
        if self.value.is_some() {
            return Err(DelayedError::BereitsGesetzt(self.name));
        }
        self.value = Some(value);
        Ok(())
    }

    pub fn get(&self) -> Result<&T, DelayedError> {
        self.value.as_ref().ok_or(DelayedError::NichtGesetzt(self.name))
    }

    pub fn get_mut(&mut self) -> Result<&mut T, DelayedError> {
        self.value
            .as_mut()
            .ok_or(DelayedError::NichtGesetzt(self.name))
    }

    pub fn take(&mut self) -> Result<T, DelayedError> {
        self.value.take().ok_or(DelayedError::NichtGesetzt(self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zugriff_vor_setzen() {
        let mut wert = Delayed::<u8>::new("cookie");
        assert_eq!(wert.get(), Err(DelayedError::NichtGesetzt("cookie")));
        wert.set(3).unwrap();
        assert_eq!(*wert.get().unwrap(), 3);
        assert_eq!(wert.set(4), Err(DelayedError::BereitsGesetzt("cookie")));
        assert_eq!(wert.take().unwrap(), 3);
        assert_eq!(wert.get(), Err(DelayedError::NichtGesetzt("cookie")));
    }
}
