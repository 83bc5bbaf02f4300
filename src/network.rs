//! Station link tracking
//!
//! [`NetworkSession`] reacts to station events and keeps the link state;
//! [`LinkMonitor`] is the `static` view of that state shared between the
//! Wi-Fi task that owns the session and the cycle that waits on it.

use core::cell::Cell;
use core::fmt;
use core::time::Duration;

use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embedded_hal_async::delay::DelayNs;
use heapless::Vec;
use log::{debug, info, warn};

/// Station credentials. Fixed at build time.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub ssid: &'static str,
    pub password: &'static str,
}

impl Credentials {
    pub const fn new(ssid: &'static str, password: &'static str) -> Self {
        Self { ssid, password }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    NotStarted,
    Started,
    Connected,
    GotAddress,
    Disconnected,
}

impl LinkState {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkState::NotStarted => "not-started",
            LinkState::Started => "started",
            LinkState::Connected => "connected",
            LinkState::GotAddress => "got-address",
            LinkState::Disconnected => "disconnected",
        }
    }
}

/// Events delivered by the station driver and the DHCP client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Started,
    Connected,
    Disconnected,
    GotAddress([u8; 4]),
}

/// Station events raised since the driver was last polled. Drivers that
/// report a set lose the order, so a disconnect and reconnect that both
/// land while the executor is busy arrive together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RaisedEvents {
    pub started: bool,
    pub connected: bool,
    pub disconnected: bool,
}

impl RaisedEvents {
    /// The events in replay order. `associated` is the radio's state now;
    /// when both connect and disconnect were raised, the one matching it
    /// goes last.
    pub fn ordered(self, associated: bool) -> Vec<LinkEvent, 3> {
        let mut events = Vec::new();
        let mut push = |event| {
            let _ = events.push(event);
        };
        if self.started {
            push(LinkEvent::Started);
        }
        match (self.connected, self.disconnected) {
            (true, true) if associated => {
                push(LinkEvent::Disconnected);
                push(LinkEvent::Connected);
            }
            (true, true) => {
                push(LinkEvent::Connected);
                push(LinkEvent::Disconnected);
            }
            (true, false) => push(LinkEvent::Connected),
            (false, true) => push(LinkEvent::Disconnected),
            (false, false) => {}
        }
        events
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkError {
    /// No address was acquired before the deadline.
    LinkTimeout,
    /// The station driver rejected a configure/start/connect call.
    Driver,
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::LinkTimeout => f.write_str("timed out waiting for an address"),
            NetworkError::Driver => f.write_str("station driver error"),
        }
    }
}

/// The Wi-Fi station, as the platform provides it. Calls return once the
/// request is issued; progress arrives later as [`LinkEvent`]s.
pub trait StationDriver {
    fn configure(&mut self, credentials: &Credentials) -> Result<(), NetworkError>;

    fn start(&mut self) -> Result<(), NetworkError>;

    fn connect(&mut self) -> Result<(), NetworkError>;
}

impl<T: StationDriver + ?Sized> StationDriver for &mut T {
    fn configure(&mut self, credentials: &Credentials) -> Result<(), NetworkError> {
        (**self).configure(credentials)
    }

    fn start(&mut self) -> Result<(), NetworkError> {
        (**self).start()
    }

    fn connect(&mut self) -> Result<(), NetworkError> {
        (**self).connect()
    }
}

/// How long to wait for the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTiming {
    /// Extra wait after the address arrives, before the first request.
    pub settle: Duration,
    /// Give up if no address by then.
    pub deadline: Duration,
}

impl LinkTiming {
    pub const SETTLE: Duration = Duration::from_millis(500);
    pub const DEADLINE: Duration = Duration::from_secs(30);
}

impl Default for LinkTiming {
    fn default() -> Self {
        Self {
            settle: Self::SETTLE,
            deadline: Self::DEADLINE,
        }
    }
}

pub(crate) fn millis(d: Duration) -> u32 {
    u32::try_from(d.as_millis()).unwrap_or(u32::MAX)
}

#[derive(Clone, Copy)]
struct Link {
    state: LinkState,
    address: Option<[u8; 4]>,
}

/// Shared link state. Const-constructible so it can live in a `static`.
pub struct LinkMonitor {
    link: Mutex<CriticalSectionRawMutex, Cell<Link>>,
    changed: Signal<CriticalSectionRawMutex, ()>,
    start: Signal<CriticalSectionRawMutex, Credentials>,
}

impl LinkMonitor {
    pub const fn new() -> Self {
        Self {
            link: Mutex::new(Cell::new(Link {
                state: LinkState::NotStarted,
                address: None,
            })),
            changed: Signal::new(),
            start: Signal::new(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.link.lock(|link| link.get().state)
    }

    /// Current IPv4 address, if the link has one.
    pub fn address(&self) -> Option<[u8; 4]> {
        self.link.lock(|link| link.get().address)
    }

    /// Ask the Wi-Fi task to bring the station up. Forgets any address
    /// from an earlier start.
    pub fn request_start(&self, credentials: Credentials) {
        self.publish(LinkState::NotStarted, None);
        self.start.signal(credentials);
    }

    /// Wi-Fi task side of [`LinkMonitor::request_start`].
    pub async fn wait_start_request(&self) -> Credentials {
        self.start.wait().await
    }

    /// Wait for an address, then `timing.settle`. Never returns `Ok` before
    /// an address has been published since the last start.
    pub async fn await_ready<D: DelayNs>(
        &self,
        delay: &mut D,
        timing: LinkTiming,
    ) -> Result<[u8; 4], NetworkError> {
        let wait_for_address = async {
            loop {
                if let Some(address) = self.address() {
                    return address;
                }
                self.changed.wait().await;
            }
        };
        match select(wait_for_address, delay.delay_ms(millis(timing.deadline))).await {
            Either::First(address) => {
                delay.delay_ms(millis(timing.settle)).await;
                Ok(address)
            }
            Either::Second(()) => {
                warn!(
                    "[WIFI] no address after {} ms (state {})",
                    millis(timing.deadline),
                    self.state().as_str()
                );
                Err(NetworkError::LinkTimeout)
            }
        }
    }

    fn publish(&self, state: LinkState, address: Option<[u8; 4]>) {
        self.link.lock(|link| link.set(Link { state, address }));
        self.changed.signal(());
    }
}

impl Default for LinkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Link-state machine driving a [`StationDriver`].
pub struct NetworkSession<'m, D: StationDriver> {
    driver: D,
    monitor: &'m LinkMonitor,
    state: LinkState,
    connect_attempts: u32,
}

impl<'m, D: StationDriver> NetworkSession<'m, D> {
    pub fn new(driver: D, monitor: &'m LinkMonitor) -> Self {
        Self {
            driver,
            monitor,
            state: LinkState::NotStarted,
            connect_attempts: 0,
        }
    }

    /// Configure station mode with `credentials` and start the driver.
    pub fn start(&mut self, credentials: &Credentials) -> Result<(), NetworkError> {
        info!("[WIFI] starting station for '{}'", credentials.ssid);
        self.driver.configure(credentials)?;
        self.driver.start()?;
        self.set(LinkState::NotStarted, None);
        Ok(())
    }

    pub fn handle_event(&mut self, event: LinkEvent) {
        debug!("[WIFI] event {:?} in state {}", event, self.state.as_str());
        match event {
            LinkEvent::Started => {
                self.set(LinkState::Started, None);
                self.connect();
            }
            LinkEvent::Connected => {
                self.set(LinkState::Connected, None);
            }
            LinkEvent::Disconnected => {
                info!("[WIFI] disconnected, reconnecting");
                self.set(LinkState::Disconnected, None);
                self.connect();
            }
            LinkEvent::GotAddress(ip) => {
                if self.state != LinkState::Connected {
                    warn!(
                        "[WIFI] address {}.{}.{}.{} ignored in state {}",
                        ip[0],
                        ip[1],
                        ip[2],
                        ip[3],
                        self.state.as_str()
                    );
                    return;
                }
                info!("[WIFI] got ip {}.{}.{}.{}", ip[0], ip[1], ip[2], ip[3]);
                self.set(LinkState::GotAddress, Some(ip));
            }
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// For waiting on driver events between calls to [`Self::handle_event`].
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    fn connect(&mut self) {
        self.connect_attempts += 1;
        if let Err(e) = self.driver.connect() {
            warn!("[WIFI] connect request failed: {}", e);
        }
    }

    fn set(&mut self, state: LinkState, address: Option<[u8; 4]>) {
        self.state = state;
        self.monitor.publish(state, address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::{block_on, join::join, yield_now};

    #[derive(Default)]
    struct Station {
        configured: Option<&'static str>,
        started: bool,
        connects: u32,
    }

    impl StationDriver for Station {
        fn configure(&mut self, credentials: &Credentials) -> Result<(), NetworkError> {
            self.configured = Some(credentials.ssid);
            Ok(())
        }

        fn start(&mut self) -> Result<(), NetworkError> {
            self.started = true;
            Ok(())
        }

        fn connect(&mut self) -> Result<(), NetworkError> {
            self.connects += 1;
            Ok(())
        }
    }

    /// Each millisecond of delay costs one executor round trip.
    struct YieldDelay;

    impl DelayNs for YieldDelay {
        async fn delay_ns(&mut self, ns: u32) {
            self.delay_ms(ns / 1_000_000).await
        }

        async fn delay_ms(&mut self, ms: u32) {
            for _ in 0..ms {
                yield_now().await;
            }
        }
    }

    const CREDS: Credentials = Credentials::new("lab", "hunter22");
    const IP: [u8; 4] = [192, 168, 4, 2];

    #[test]
    fn started_event_triggers_a_single_connect() {
        let monitor = LinkMonitor::new();
        let mut session = NetworkSession::new(Station::default(), &monitor);
        session.start(&CREDS).unwrap();
        assert_eq!(session.driver().configured, Some("lab"));
        assert!(session.driver().started);

        session.handle_event(LinkEvent::Started);
        assert_eq!(session.state(), LinkState::Started);
        assert_eq!(session.driver().connects, 1);
    }

    #[test]
    fn address_only_accepted_while_connected() {
        let monitor = LinkMonitor::new();
        let mut session = NetworkSession::new(Station::default(), &monitor);
        session.handle_event(LinkEvent::Started);
        session.handle_event(LinkEvent::GotAddress(IP));
        assert_eq!(session.state(), LinkState::Started);
        assert_eq!(monitor.address(), None);

        session.handle_event(LinkEvent::Connected);
        session.handle_event(LinkEvent::GotAddress(IP));
        assert_eq!(monitor.state(), LinkState::GotAddress);
        assert_eq!(monitor.address(), Some(IP));
    }

    #[test]
    fn each_disconnect_reconnects_exactly_once() {
        let monitor = LinkMonitor::new();
        let mut session = NetworkSession::new(Station::default(), &monitor);
        session.handle_event(LinkEvent::Started);
        session.handle_event(LinkEvent::Connected);
        session.handle_event(LinkEvent::GotAddress(IP));

        session.handle_event(LinkEvent::Disconnected);
        assert_eq!(session.driver().connects, 2);
        assert_eq!(monitor.state(), LinkState::Disconnected);
        assert_eq!(monitor.address(), None);

        session.handle_event(LinkEvent::Disconnected);
        assert_eq!(session.connect_attempts(), 3);

        session.handle_event(LinkEvent::Connected);
        session.handle_event(LinkEvent::GotAddress(IP));
        assert_eq!(session.state(), LinkState::GotAddress);
        assert_eq!(session.driver().connects, 3);
    }

    #[test]
    fn batched_events_replay_in_the_order_the_radio_ended_up_in() {
        let both = RaisedEvents {
            started: false,
            connected: true,
            disconnected: true,
        };
        assert_eq!(
            both.ordered(true).as_slice(),
            &[LinkEvent::Disconnected, LinkEvent::Connected]
        );
        assert_eq!(
            both.ordered(false).as_slice(),
            &[LinkEvent::Connected, LinkEvent::Disconnected]
        );

        let boot = RaisedEvents {
            started: true,
            connected: true,
            disconnected: false,
        };
        assert_eq!(
            boot.ordered(true).as_slice(),
            &[LinkEvent::Started, LinkEvent::Connected]
        );
        assert!(RaisedEvents::default().ordered(false).is_empty());
    }

    #[test]
    fn reconnect_batched_with_its_disconnect_can_still_get_an_address() {
        let monitor = LinkMonitor::new();
        let mut session = NetworkSession::new(Station::default(), &monitor);
        session.handle_event(LinkEvent::Started);
        session.handle_event(LinkEvent::Connected);
        session.handle_event(LinkEvent::GotAddress(IP));

        let batch = RaisedEvents {
            started: false,
            connected: true,
            disconnected: true,
        };
        for event in batch.ordered(true) {
            session.handle_event(event);
        }
        assert_eq!(session.state(), LinkState::Connected);
        assert_eq!(monitor.address(), None);

        session.handle_event(LinkEvent::GotAddress(IP));
        assert_eq!(monitor.state(), LinkState::GotAddress);
        assert_eq!(monitor.address(), Some(IP));
    }

    #[test]
    fn await_ready_waits_for_the_address() {
        let monitor = LinkMonitor::new();
        let mut session = NetworkSession::new(Station::default(), &monitor);
        let timing = LinkTiming {
            settle: Duration::from_millis(5),
            deadline: Duration::from_millis(1_000),
        };
        let mut delay = YieldDelay;

        let feed = async {
            for event in [LinkEvent::Started, LinkEvent::Connected] {
                session.handle_event(event);
                yield_now().await;
                assert_eq!(monitor.address(), None);
            }
            for _ in 0..10 {
                yield_now().await;
            }
            session.handle_event(LinkEvent::GotAddress(IP));
        };
        let (ready, ()) = block_on(join(monitor.await_ready(&mut delay, timing), feed));
        assert_eq!(ready, Ok(IP));
    }

    #[test]
    fn await_ready_times_out_without_an_address() {
        let monitor = LinkMonitor::new();
        let mut session = NetworkSession::new(Station::default(), &monitor);
        session.handle_event(LinkEvent::Started);
        session.handle_event(LinkEvent::Connected);
        let timing = LinkTiming {
            settle: Duration::ZERO,
            deadline: Duration::from_millis(20),
        };
        let ready = block_on(monitor.await_ready(&mut YieldDelay, timing));
        assert_eq!(ready, Err(NetworkError::LinkTimeout));
    }

    #[test]
    fn request_start_forgets_the_old_address() {
        let monitor = LinkMonitor::new();
        let mut session = NetworkSession::new(Station::default(), &monitor);
        session.handle_event(LinkEvent::Started);
        session.handle_event(LinkEvent::Connected);
        session.handle_event(LinkEvent::GotAddress(IP));

        monitor.request_start(CREDS);
        assert_eq!(monitor.address(), None);
        assert_eq!(block_on(monitor.wait_start_request()), CREDS);
    }
}
