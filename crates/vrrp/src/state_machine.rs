//! VRRP state transition table.
//!
//! Implements RFC 5798 Section 6.4 as a pure function of (state, event):
//! - Init → Backup/Master on startup
//! - Backup → Master on master down timer expiry
//! - Master → Backup on a better advertisement
//! - any → Init on shutdown, any → Down on interface loss
//!
//! The router executes the returned actions while holding its own lock.

use crate::error::VRRPError;
use crate::types::{RELINQUISH_PRIORITY, VRRPState, master_down_interval, skew_time};
use std::net::IpAddr;

/// A validated advertisement for this router's group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advertisement {
    pub priority: u8,
    /// Max advertisement interval carried by the sender (ticks)
    pub interval: u16,
    pub source: IpAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Startup,
    Advertisement(Advertisement),
    MasterDownTimer,
    AdvertTimer,
    Shutdown,
    InterfaceDown,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Startup => "start",
            Event::Advertisement(_) => "receive advertisement",
            Event::MasterDownTimer => "expire master down timer",
            Event::AdvertTimer => "expire advertisement timer",
            Event::Shutdown => "stop",
            Event::InterfaceDown => "lose interface",
        }
    }
}

/// Router parameters the table consults.
#[derive(Debug, Clone, Copy)]
pub struct Local {
    pub priority: u8,
    pub advert_interval: u16,
    pub preempt: bool,
    pub primary_address: IpAddr,
}

impl Local {
    fn is_owner(&self) -> bool {
        self.priority == crate::types::OWNER_PRIORITY
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Remember the interval advertised by the current Master (ticks)
    LearnMasterInterval(u16),
    SendAdvertisement { priority: u8 },
    /// Arm the advertisement timer at the router's own interval
    ArmAdvertTimer,
    ArmMasterDownTimer { ticks: u16 },
    CancelTimers,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: VRRPState,
    pub actions: Vec<Action>,
}

impl Transition {
    fn to(next: VRRPState, actions: Vec<Action>) -> Self {
        Self { next, actions }
    }

    fn stay(state: VRRPState) -> Self {
        Self::to(state, Vec::new())
    }
}

fn become_master(local: &Local) -> Transition {
    Transition::to(
        VRRPState::Master,
        vec![
            Action::SendAdvertisement {
                priority: local.priority,
            },
            Action::ArmAdvertTimer,
        ],
    )
}

fn become_backup(local: &Local, master_interval: u16) -> Transition {
    Transition::to(
        VRRPState::Backup,
        vec![
            Action::LearnMasterInterval(master_interval),
            Action::ArmMasterDownTimer {
                ticks: master_down_interval(local.priority, master_interval),
            },
        ],
    )
}

/// Whether an advertisement outranks this router.
fn outranks(local: &Local, advert: &Advertisement) -> bool {
    if advert.priority != local.priority {
        return advert.priority > local.priority;
    }
    match (advert.source, local.primary_address) {
        (IpAddr::V4(theirs), IpAddr::V4(ours)) => theirs > ours,
        (IpAddr::V6(theirs), IpAddr::V6(ours)) => theirs > ours,
        _ => false,
    }
}

/// Compute the transition for `event` in `state`.
pub fn transition(
    state: VRRPState,
    event: &Event,
    local: &Local,
) -> Result<Transition, VRRPError> {
    use VRRPState::*;

    let t = match (state, event) {
        (Init | Down, Event::Startup) if local.is_owner() => become_master(local),
        (Init | Down, Event::Startup) => become_backup(local, local.advert_interval),
        (Backup | Master, Event::Startup) => {
            return Err(VRRPError::InvalidTransition {
                state,
                event: event.name(),
            });
        }

        (Backup, Event::Advertisement(advert)) if advert.priority == RELINQUISH_PRIORITY => {
            Transition::to(
                Backup,
                vec![
                    Action::LearnMasterInterval(advert.interval),
                    Action::ArmMasterDownTimer {
                        ticks: skew_time(local.priority, advert.interval),
                    },
                ],
            )
        }
        // Preempting: let the timer run out on a weaker Master.
        (Backup, Event::Advertisement(advert))
            if local.preempt && advert.priority < local.priority =>
        {
            Transition::stay(Backup)
        }
        (Backup, Event::Advertisement(advert)) => become_backup(local, advert.interval),
        (Backup, Event::MasterDownTimer) => become_master(local),
        (Backup, Event::AdvertTimer) => Transition::stay(Backup),

        (Master, Event::AdvertTimer) => become_master(local),
        (Master, Event::Advertisement(advert)) if advert.priority == RELINQUISH_PRIORITY => {
            become_master(local)
        }
        (Master, Event::Advertisement(advert)) if outranks(local, advert) => {
            become_backup(local, advert.interval)
        }
        (Master, Event::Advertisement(_)) => Transition::stay(Master),
        (Master, Event::MasterDownTimer) => Transition::stay(Master),

        (Master, Event::Shutdown) => Transition::to(
            Init,
            vec![
                Action::CancelTimers,
                Action::SendAdvertisement {
                    priority: RELINQUISH_PRIORITY,
                },
            ],
        ),
        (Backup | Down, Event::Shutdown) => Transition::to(Init, vec![Action::CancelTimers]),
        (Init, Event::Shutdown) => Transition::stay(Init),

        (_, Event::InterfaceDown) => Transition::to(Down, vec![Action::CancelTimers]),

        // Inert states drop everything else.
        (Init | Down, Event::Advertisement(_) | Event::MasterDownTimer | Event::AdvertTimer) => {
            Transition::stay(state)
        }
    };

    Ok(t)
}
