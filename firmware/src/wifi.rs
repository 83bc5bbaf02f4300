//! Station-mode Wi-Fi on esp-wifi, reported into the shared [`LinkMonitor`].

use embassy_futures::select::{Either, select};
use embassy_net::Stack;
use esp_wifi::wifi::{
    AuthMethod, ClientConfiguration, Configuration, WifiController, WifiEvent,
};
use log::{debug, error, warn};
use wakecam::network::StationDriver;
use wakecam::{
    Credentials, LinkEvent, LinkMonitor, LinkState, NetworkError, NetworkSession, RaisedEvents,
};

pub struct EspStation {
    controller: WifiController<'static>,
}

impl EspStation {
    pub fn new(controller: WifiController<'static>) -> Self {
        Self { controller }
    }

    /// Next batch of station events, in the order they should be handled.
    async fn events(&mut self) -> heapless::Vec<LinkEvent, 3> {
        let raised = self
            .controller
            .wait_for_events(
                WifiEvent::StaStart | WifiEvent::StaConnected | WifiEvent::StaDisconnected,
                false,
            )
            .await;
        let raised = RaisedEvents {
            started: raised.contains(WifiEvent::StaStart),
            connected: raised.contains(WifiEvent::StaConnected),
            disconnected: raised.contains(WifiEvent::StaDisconnected),
        };
        let associated = self.controller.is_connected().unwrap_or(false);
        if raised.connected && raised.disconnected {
            debug!("[WIFI] disconnect and connect in one batch, associated: {}", associated);
        }
        raised.ordered(associated)
    }
}

impl StationDriver for EspStation {
    fn configure(&mut self, credentials: &Credentials) -> Result<(), NetworkError> {
        let client = ClientConfiguration {
            ssid: credentials.ssid.try_into().map_err(|_| NetworkError::Driver)?,
            password: credentials
                .password
                .try_into()
                .map_err(|_| NetworkError::Driver)?,
            auth_method: if credentials.password.is_empty() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ..Default::default()
        };
        self.controller
            .set_configuration(&Configuration::Client(client))
            .map_err(|e| {
                error!("[WIFI] configuration rejected: {:?}", e);
                NetworkError::Driver
            })
    }

    fn start(&mut self) -> Result<(), NetworkError> {
        self.controller.start().map_err(|e| {
            error!("[WIFI] start failed: {:?}", e);
            NetworkError::Driver
        })
    }

    fn connect(&mut self) -> Result<(), NetworkError> {
        self.controller.connect().map_err(|e| {
            warn!("[WIFI] connect failed: {:?}", e);
            NetworkError::Driver
        })
    }
}

/// Waits for the cycle to ask for the link, then feeds station and DHCP
/// events into a [`NetworkSession`] for the rest of the boot.
#[embassy_executor::task]
pub async fn link_task(
    station: EspStation,
    stack: Stack<'static>,
    monitor: &'static LinkMonitor,
) -> ! {
    let credentials = monitor.wait_start_request().await;
    let mut session = NetworkSession::new(station, monitor);
    if let Err(e) = session.start(&credentials) {
        error!("[WIFI] station did not start: {}", e);
    }

    loop {
        let events = if session.state() == LinkState::Connected {
            match select(session.driver_mut().events(), stack.wait_config_up()).await {
                Either::First(events) => events,
                Either::Second(()) => {
                    if let Some(config) = stack.config_v4() {
                        session.handle_event(LinkEvent::GotAddress(
                            config.address.address().octets(),
                        ));
                    }
                    continue;
                }
            }
        } else {
            session.driver_mut().events().await
        };

        for event in events {
            session.handle_event(event);
        }
    }
}
