//! Link lifecycle transitions
//!
//! The table is the only place that decides which state follows which. The
//! supervisor performs the side effects; this module just says whether a move
//! is legal.

use crate::domain::models::LinkState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    ConnectRequested { cached_device: bool },
    DeviceSelected,
    DiscoveryFailed,
    GattConnected,
    EndpointReady,
    Failed,
    UnexpectedDrop,
    Reconnected,
    ReconnectFailed,
    DisconnectRequested,
}

pub fn transition(from: LinkState, event: LinkEvent) -> Option<LinkState> {
    use LinkEvent::*;
    use LinkState::*;

    let to = match (from, event) {
        (Idle | Disconnected, ConnectRequested { cached_device: false }) => Discovering,
        (Idle | Disconnected, ConnectRequested { cached_device: true }) => Connecting,
        (Discovering, DeviceSelected) => Connecting,
        (Discovering, DiscoveryFailed) => Idle,
        (Connecting, GattConnected) => ResolvingEndpoint,
        (Connecting | ResolvingEndpoint, Failed) => Idle,
        (ResolvingEndpoint, EndpointReady) => Connected,
        (Connected, UnexpectedDrop) => Reconnecting,
        (Reconnecting, Reconnected) => Connected,
        (Reconnecting, ReconnectFailed) => Disconnected,
        (Connected | Reconnecting, DisconnectRequested) => Disconnected,
        _ => return None,
    };
    Some(to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use LinkEvent::*;
    use LinkState::*;

    #[test]
    fn happy_path_from_idle() {
        let mut state = Idle;
        for event in [
            ConnectRequested {
                cached_device: false,
            },
            DeviceSelected,
            GattConnected,
            EndpointReady,
        ] {
            state = transition(state, event).unwrap();
        }
        assert_eq!(state, Connected);
    }

    #[test]
    fn cached_device_skips_discovery() {
        assert_eq!(
            transition(Disconnected, ConnectRequested { cached_device: true }),
            Some(Connecting)
        );
    }

    #[test]
    fn failures_fall_back_without_retry() {
        assert_eq!(transition(Discovering, DiscoveryFailed), Some(Idle));
        assert_eq!(transition(Connecting, Failed), Some(Idle));
        assert_eq!(transition(ResolvingEndpoint, Failed), Some(Idle));
        assert_eq!(transition(Reconnecting, ReconnectFailed), Some(Disconnected));
    }

    #[test]
    fn drop_only_matters_while_connected() {
        assert_eq!(transition(Connected, UnexpectedDrop), Some(Reconnecting));
        assert_eq!(transition(Reconnecting, UnexpectedDrop), None);
        assert_eq!(transition(Idle, UnexpectedDrop), None);
    }

    #[test]
    fn disconnect_is_accepted_from_live_states_only() {
        assert_eq!(transition(Connected, DisconnectRequested), Some(Disconnected));
        assert_eq!(transition(Reconnecting, DisconnectRequested), Some(Disconnected));
        assert_eq!(transition(Idle, DisconnectRequested), None);
        assert_eq!(transition(Disconnected, DisconnectRequested), None);
    }

    #[test]
    fn disconnected_is_reenterable() {
        let state = transition(Disconnected, ConnectRequested { cached_device: false });
        assert_eq!(state, Some(Discovering));
    }
}
