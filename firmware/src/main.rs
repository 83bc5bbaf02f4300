#![no_std]
#![no_main]

extern crate alloc;

use embassy_net::{Config, StackResources};
use embassy_time::Delay;
use esp_backtrace as _;
use esp_hal::clock::CpuClock;
use esp_hal::i2c::master::I2c;
use esp_hal::lcd_cam::LcdCam;
use esp_hal::lcd_cam::cam::{Camera, Config as CamConfig};
use esp_hal::ledc::channel::{self, ChannelIFace};
use esp_hal::ledc::timer::{self, TimerIFace};
use esp_hal::ledc::{LSGlobalClkSource, Ledc, LowSpeed};
use esp_hal::rng::Rng;
use esp_hal::rtc_cntl::Rtc;
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use esp_hal_embassy::Executor;
use esp_println::println;
use log::info;
use static_cell::StaticCell;
use wakecam::{Clock, CycleConfig, CycleController, Hardware, LinkMonitor, Timestamp};

mod board;
mod camera;
mod config;
mod http;
mod wifi;

use board::EspBoard;
use camera::EspCamera;
use http::EspHttp;
use wifi::{EspStation, link_task};

esp_bootloader_esp_idf::esp_app_desc!();

static WIFI_INIT_CELL: StaticCell<esp_wifi::EspWifiController<'static>> = StaticCell::new();
static STACK_RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();
static EXECUTOR: StaticCell<Executor> = StaticCell::new();

static LINK: LinkMonitor = LinkMonitor::new();

/// Wall clock from the RTC. Starts at the epoch on a cold boot and keeps
/// counting through deep sleep.
struct RtcClock<'a>(&'a Rtc<'static>);

impl Clock for RtcClock<'_> {
    fn now(&self) -> Timestamp {
        Timestamp::from_unix_micros(self.0.current_time_us())
    }
}

#[embassy_executor::task]
async fn net_task(
    mut runner: embassy_net::Runner<'static, esp_wifi::wifi::WifiDevice<'static>>,
) -> ! {
    runner.run().await
}

#[embassy_executor::task]
async fn cycle_task(
    config: CycleConfig,
    mut board: EspBoard<'static>,
    camera: EspCamera<'static>,
    http: EspHttp,
    mut rtc: Rtc<'static>,
) -> ! {
    let report = {
        let hardware = Hardware {
            board: &mut board,
            camera,
            http,
            delay: Delay,
            clock: RtcClock(&rtc),
            telemetry: config.telemetry,
        };
        CycleController::new(config, &LINK, hardware).run().await
    };
    info!(
        "[MAIN] cycle ended in {:?} after {} phases",
        report.outcome,
        report.trace.len()
    );
    board.enter_deep_sleep(&mut rtc)
}

#[esp_hal::main]
fn main() -> ! {
    let peripherals = esp_hal::init(esp_hal::Config::default().with_cpu_clock(CpuClock::max()));

    esp_println::logger::init_logger_from_env();
    println!("[MAIN] wakecam {}", wakecam::VERSION);

    // Internal heap for the Wi-Fi driver, PSRAM for packaged payloads.
    esp_alloc::heap_allocator!(size: 72 * 1024);
    esp_alloc::psram_allocator!(peripherals.PSRAM, esp_hal::psram);

    let config = config::cycle_config();
    let rtc = Rtc::new(peripherals.LPWR);

    let timer_group0 = TimerGroup::new(peripherals.TIMG0);
    esp_hal_embassy::init(timer_group0.timer0);

    // Wi-Fi
    let timer_group1 = TimerGroup::new(peripherals.TIMG1);
    let mut rng = Rng::new(peripherals.RNG);
    let seed = (rng.random() as u64) << 32 | rng.random() as u64;
    let wifi_init = WIFI_INIT_CELL
        .init(esp_wifi::init(timer_group1.timer0, rng, peripherals.RADIO_CLK).unwrap());
    let (wifi_controller, wifi_interfaces) =
        esp_wifi::wifi::new(wifi_init, peripherals.WIFI).unwrap();
    let (stack, runner) = embassy_net::new(
        wifi_interfaces.sta,
        Config::dhcpv4(Default::default()),
        STACK_RESOURCES.init(StackResources::new()),
        seed,
    );
    println!("[WIFI] driver and stack created");

    // Camera XCLK. The channel must stay alive for as long as the sensor runs.
    let mut ledc = Ledc::new(peripherals.LEDC);
    ledc.set_global_slow_clock(LSGlobalClkSource::APBClk);
    let mut xclk_timer = ledc.timer::<LowSpeed>(timer::Number::Timer0);
    xclk_timer
        .configure(timer::config::Config {
            duty: timer::config::Duty::Duty1Bit,
            clock_source: timer::LSClockSource::APBClk,
            frequency: Rate::from_hz(config.profile.xclk_hz),
        })
        .unwrap();
    let mut xclk = ledc.channel(channel::Number::Channel0, peripherals.GPIO10);
    xclk.configure(channel::config::Config {
        timer: &xclk_timer,
        duty_pct: 50,
        pin_config: channel::config::PinConfig::PushPull,
    })
    .unwrap();

    let i2c = I2c::new(peripherals.I2C0, esp_hal::i2c::master::Config::default())
        .unwrap()
        .with_sda(peripherals.GPIO40)
        .with_scl(peripherals.GPIO39);
    let lcd_cam = LcdCam::new(peripherals.LCD_CAM);
    let cam = Camera::new(lcd_cam.cam, peripherals.DMA_CH0, CamConfig::default())
        .unwrap()
        .with_pixel_clock(peripherals.GPIO13)
        .with_vsync(peripherals.GPIO38)
        .with_h_enable(peripherals.GPIO47)
        .with_data0(peripherals.GPIO15)
        .with_data1(peripherals.GPIO17)
        .with_data2(peripherals.GPIO18)
        .with_data3(peripherals.GPIO16)
        .with_data4(peripherals.GPIO14)
        .with_data5(peripherals.GPIO12)
        .with_data6(peripherals.GPIO11)
        .with_data7(peripherals.GPIO48);
    println!("[CAM] xclk {} Hz on GPIO10, bus ready", config.profile.xclk_hz);

    let board = EspBoard::new(peripherals.GPIO1, peripherals.GPIO21);
    let camera = EspCamera::new(i2c, cam);
    let http = EspHttp::new(stack);
    let station = EspStation::new(wifi_controller);

    let executor = EXECUTOR.init(Executor::new());
    executor.run(|spawner| {
        spawner.spawn(net_task(runner)).ok();
        spawner.spawn(link_task(station, stack, &LINK)).ok();
        spawner
            .spawn(cycle_task(config, board, camera, http, rtc))
            .ok();
    })
}
