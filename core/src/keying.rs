//! Radio keying and rig control.
//!
//! `RigControl` is the boundary to whatever actually talks to the radio
//! (a rigctld client, a CAT serial backend, a dummy). The keying
//! controller wraps one boxed implementation, publishes every PTT
//! transition, and swallows keying failures: a radio that will not key is
//! an operational fault to surface in status, never a reason to crash the
//! transmit path.

use std::sync::Arc;

use crossbeam_channel::Sender;
use log::{debug, warn};
use parking_lot::Mutex;

use crate::context::SharedContext;
use crate::error::Result;
use crate::modem::ModemEvent;

pub const RIG_STATUS_CONNECTED: &str = "connected";
pub const RIG_STATUS_DISCONNECTED: &str = "unknown/disconnected";

pub trait RigControl: Send {
    fn set_ptt(&mut self, state: bool) -> Result<()>;
    fn get_ptt(&mut self) -> Result<bool>;
    fn get_frequency(&mut self) -> Result<String>;
    fn set_frequency(&mut self, freq: &str) -> Result<()>;
    fn get_mode(&mut self) -> Result<String>;
    fn set_mode(&mut self, mode: &str) -> Result<()>;
    fn get_bandwidth(&mut self) -> Result<String>;
    fn get_status(&mut self) -> String;
    fn get_alc(&mut self) -> Result<f32>;
    fn get_strength(&mut self) -> Result<String>;
}

/// No-hardware stand-in: accepts everything, reports nothing.
#[derive(Default)]
pub struct DummyRig {
    ptt: bool,
}

impl RigControl for DummyRig {
    fn set_ptt(&mut self, state: bool) -> Result<()> {
        self.ptt = state;
        Ok(())
    }

    fn get_ptt(&mut self) -> Result<bool> {
        Ok(self.ptt)
    }

    fn get_frequency(&mut self) -> Result<String> {
        Ok(String::from("0"))
    }

    fn set_frequency(&mut self, _freq: &str) -> Result<()> {
        Ok(())
    }

    fn get_mode(&mut self) -> Result<String> {
        Ok(String::new())
    }

    fn set_mode(&mut self, _mode: &str) -> Result<()> {
        Ok(())
    }

    fn get_bandwidth(&mut self) -> Result<String> {
        Ok(String::new())
    }

    fn get_status(&mut self) -> String {
        RIG_STATUS_CONNECTED.into()
    }

    fn get_alc(&mut self) -> Result<f32> {
        Ok(0.0)
    }

    fn get_strength(&mut self) -> Result<String> {
        Ok(String::from("0"))
    }
}

pub struct RigKeyingController {
    rig: Mutex<Box<dyn RigControl>>,
    ctx: Arc<SharedContext>,
    events: Sender<ModemEvent>,
}

impl RigKeyingController {
    pub fn new(
        rig: Box<dyn RigControl>,
        ctx: Arc<SharedContext>,
        events: Sender<ModemEvent>,
    ) -> Self {
        Self {
            rig: Mutex::new(rig),
            ctx,
            events,
        }
    }

    /// Assert or release PTT. On success the new state is published to
    /// the shared context and the event stream; on failure the state is
    /// left as-is and the failure is logged.
    pub fn key(&self, state: bool) {
        match self.rig.lock().set_ptt(state) {
            Ok(()) => {
                self.ctx.set_ptt_state(state);
                debug!("ptt: state={state}");
                let _ = self.events.send(ModemEvent::PttChanged(state));
            }
            Err(err) => {
                warn!("keying failed: state={state} error={err}");
            }
        }
    }

    pub fn ptt_state(&self) -> bool {
        self.ctx.ptt_state()
    }

    /// Run one rig-control call under the controller's lock. Used by the
    /// polling and command workers; keep the closure short, PTT waits on
    /// the same lock.
    pub fn with_rig<R>(&self, f: impl FnOnce(&mut dyn RigControl) -> R) -> R {
        f(self.rig.lock().as_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModemError;
    use crossbeam_channel::unbounded;

    struct FailingRig;

    impl RigControl for FailingRig {
        fn set_ptt(&mut self, _state: bool) -> Result<()> {
            Err(ModemError::Rig("connection refused".into()))
        }

        fn get_ptt(&mut self) -> Result<bool> {
            Err(ModemError::Rig("connection refused".into()))
        }

        fn get_frequency(&mut self) -> Result<String> {
            Err(ModemError::Rig("connection refused".into()))
        }

        fn set_frequency(&mut self, _freq: &str) -> Result<()> {
            Err(ModemError::Rig("connection refused".into()))
        }

        fn get_mode(&mut self) -> Result<String> {
            Err(ModemError::Rig("connection refused".into()))
        }

        fn set_mode(&mut self, _mode: &str) -> Result<()> {
            Err(ModemError::Rig("connection refused".into()))
        }

        fn get_bandwidth(&mut self) -> Result<String> {
            Err(ModemError::Rig("connection refused".into()))
        }

        fn get_status(&mut self) -> String {
            RIG_STATUS_DISCONNECTED.into()
        }

        fn get_alc(&mut self) -> Result<f32> {
            Err(ModemError::Rig("connection refused".into()))
        }

        fn get_strength(&mut self) -> Result<String> {
            Err(ModemError::Rig("connection refused".into()))
        }
    }

    #[test]
    fn test_key_publishes_transitions() {
        let ctx = Arc::new(SharedContext::default());
        let (events_tx, events_rx) = unbounded();
        let keyer = RigKeyingController::new(Box::<DummyRig>::default(), ctx.clone(), events_tx);

        keyer.key(true);
        assert!(ctx.ptt_state());
        assert!(matches!(
            events_rx.try_recv().unwrap(),
            ModemEvent::PttChanged(true)
        ));

        keyer.key(false);
        assert!(!ctx.ptt_state());
        assert!(matches!(
            events_rx.try_recv().unwrap(),
            ModemEvent::PttChanged(false)
        ));
    }

    #[test]
    fn test_keying_failure_is_swallowed() {
        let ctx = Arc::new(SharedContext::default());
        let (events_tx, events_rx) = unbounded();
        let keyer = RigKeyingController::new(Box::new(FailingRig), ctx.clone(), events_tx);

        keyer.key(true);
        // state unchanged, no event, no panic
        assert!(!ctx.ptt_state());
        assert!(events_rx.try_recv().is_err());
    }

    #[test]
    fn test_with_rig_runs_under_lock() {
        let ctx = Arc::new(SharedContext::default());
        let (events_tx, _events_rx) = unbounded();
        let keyer = RigKeyingController::new(Box::<DummyRig>::default(), ctx, events_tx);
        let status = keyer.with_rig(|rig| rig.get_status());
        assert_eq!(status, RIG_STATUS_CONNECTED);
    }
}
