//! ESP32 build: real peripherals behind the hardware traits.

use anyhow::{anyhow, Context};
use chrono::Utc;
use ds18b20::{Ds18b20, Resolution};
use embedded_svc::wifi::{AuthMethod, ClientConfiguration, Configuration};
use esp_idf_hal::delay::{Ets, FreeRtos, BLOCK};
use esp_idf_hal::gpio::{AnyIOPin, InputOutput, PinDriver};
use esp_idf_hal::i2c::{I2cConfig, I2cDriver, I2C0};
use esp_idf_hal::units::Hertz;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::modem::Modem;
use esp_idf_svc::hal::prelude::Peripherals;
use esp_idf_svc::log::EspLogger;
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs};
use esp_idf_svc::sntp::{EspSntp, SyncStatus};
use esp_idf_svc::wifi::{BlockingWifi, EspWifi};
use log::{info, warn};
use one_wire_bus::OneWire;
use serde::{Deserialize, Serialize};

use vivarium_common::hal::{BusStatus, Delay, I2cPort, System, Thermometers, UpdateSink};
use vivarium_common::{MonitorConfig, Url, VivariumMonitor};

use crate::tcp::{TcpNet, TcpServer};

const SDA_PIN: i32 = 21;
const SCL_PIN: i32 = 22;
const ONE_WIRE_PIN: i32 = 4;
const I2C_BAUD: u32 = 100_000;
const WEB_PORT: u16 = 80;

const WIFI_SSID: Option<&str> = option_env!("VIVARIUM_WIFI_SSID");
const WIFI_PASS: Option<&str> = option_env!("VIVARIUM_WIFI_PASS");
const WIFI_CONNECT_ATTEMPTS: u32 = 5;
const WIFI_RETRY_DELAY_MS: u32 = 3_000;
const SNTP_SYNC_POLLS: u32 = 120;

const NVS_NAMESPACE: &str = "vivarium";
const NVS_CONFIG_KEY: &str = "config_json";
const NVS_CONFIG_MAX: usize = 1024;

#[derive(Debug, Default, Serialize, Deserialize)]
struct DeviceConfig {
    #[serde(default)]
    monitor: MonitorConfig,
    #[serde(default)]
    update_url: Url,
}

/// I2C master with bit-bang access to its own pins for bus recovery. The
/// driver is torn down before any pin-level operation and rebuilt by
/// `reinit`.
struct EspI2cPort {
    driver: Option<I2cDriver<'static>>,
}

impl EspI2cPort {
    fn init() -> anyhow::Result<Self> {
        let driver = Self::make_driver().context("installing i2c driver")?;
        Ok(Self {
            driver: Some(driver),
        })
    }

    // Safety of the conjured handles: the previous driver instance is
    // dropped before this runs, so the peripheral and pins are free.
    fn make_driver() -> Result<I2cDriver<'static>, esp_idf_sys::EspError> {
        let i2c = unsafe { I2C0::new() };
        let sda = unsafe { AnyIOPin::new(SDA_PIN) };
        let scl = unsafe { AnyIOPin::new(SCL_PIN) };
        let config = I2cConfig::new().baudrate(Hertz(I2C_BAUD));
        I2cDriver::new(i2c, sda, scl, &config)
    }

    fn set_line(&mut self, pin: i32, low: bool) {
        // Pin-level control requires the i2c driver out of the way.
        self.driver = None;
        unsafe {
            esp_idf_sys::gpio_set_direction(
                pin,
                esp_idf_sys::gpio_mode_t_GPIO_MODE_INPUT_OUTPUT_OD,
            );
            esp_idf_sys::gpio_set_level(pin, u32::from(!low));
        }
    }

    fn line_low(&mut self, pin: i32) -> bool {
        unsafe { esp_idf_sys::gpio_get_level(pin) == 0 }
    }
}

impl I2cPort for EspI2cPort {
    fn write(&mut self, addr: u8, bytes: &[u8]) -> BusStatus {
        let Some(driver) = self.driver.as_mut() else {
            return BusStatus::BusStuck;
        };
        match driver.write(addr, bytes, BLOCK) {
            Ok(()) => BusStatus::Ok,
            Err(err) if err.code() == esp_idf_sys::ESP_ERR_TIMEOUT => BusStatus::BusStuck,
            Err(err) if err.code() == esp_idf_sys::ESP_ERR_INVALID_SIZE => BusStatus::DataTooLong,
            Err(_) => BusStatus::AddrNack,
        }
    }

    fn read_into(&mut self, addr: u8, buf: &mut [u8]) -> usize {
        let Some(driver) = self.driver.as_mut() else {
            return 0;
        };
        match driver.read(addr, buf, BLOCK) {
            Ok(()) => buf.len(),
            Err(err) => {
                warn!("i2c read from {addr} failed: {err}");
                0
            }
        }
    }

    fn release_scl(&mut self) {
        self.set_line(SCL_PIN, false);
    }

    fn release_sda(&mut self) {
        self.set_line(SDA_PIN, false);
    }

    fn drive_scl_low(&mut self) {
        self.set_line(SCL_PIN, true);
    }

    fn drive_sda_low(&mut self) {
        self.set_line(SDA_PIN, true);
    }

    fn scl_is_low(&mut self) -> bool {
        self.line_low(SCL_PIN)
    }

    fn sda_is_low(&mut self) -> bool {
        self.line_low(SDA_PIN)
    }

    fn reinit(&mut self) {
        self.driver = None;
        match Self::make_driver() {
            Ok(driver) => self.driver = Some(driver),
            Err(err) => warn!("i2c reinit failed: {err}"),
        }
    }
}

type OwBus = OneWire<PinDriver<'static, AnyIOPin, InputOutput>>;

struct EspTherms {
    bus: OwBus,
    devices: Vec<Ds18b20>,
}

impl EspTherms {
    fn enumerate(mut bus: OwBus) -> Self {
        let mut devices = Vec::new();
        for device in bus.devices(false, &mut Ets) {
            match device {
                Ok(address) if address.family_code() == ds18b20::FAMILY_CODE => {
                    match Ds18b20::new::<core::convert::Infallible>(address) {
                        Ok(sensor) => devices.push(sensor),
                        Err(_) => warn!("rejected one-wire address {address:?}"),
                    }
                }
                Ok(address) => {
                    warn!("ignoring non-thermometer one-wire device {address:?}");
                }
                Err(_) => {
                    warn!("one-wire enumeration error");
                    break;
                }
            }
        }
        Self { bus, devices }
    }
}

impl Thermometers for EspTherms {
    fn device_count(&mut self) -> usize {
        self.devices.len()
    }

    fn set_resolution(&mut self, index: usize, bits: u8) -> bool {
        let resolution = match bits {
            9 => Resolution::Bits9,
            10 => Resolution::Bits10,
            11 => Resolution::Bits11,
            _ => Resolution::Bits12,
        };
        self.devices[index]
            .set_config(i8::MIN, i8::MAX, resolution, &mut self.bus, &mut Ets)
            .is_ok()
    }

    fn request_conversion(&mut self) {
        if ds18b20::start_simultaneous_temp_measurement(&mut self.bus, &mut Ets).is_err() {
            warn!("failed to start temperature conversion");
        }
    }

    fn read_celsius(&mut self, index: usize) -> f32 {
        match self.devices[index].read_data(&mut self.bus, &mut Ets) {
            Ok(data) => data.temperature,
            // Below the error sentinel threshold, so the scan aborts.
            Err(_) => -127.0,
        }
    }
}

struct RtosDelay;

impl Delay for RtosDelay {
    fn delay_us(&mut self, us: u32) {
        Ets::delay_us(us);
    }

    fn delay_ms(&mut self, ms: u32) {
        FreeRtos::delay_ms(ms);
    }
}

/// Stages images into the inactive OTA partition via the raw esp_ota API.
struct EspOtaSink {
    handle: Option<esp_idf_sys::esp_ota_handle_t>,
    partition: *const esp_idf_sys::esp_partition_t,
}

impl Default for EspOtaSink {
    fn default() -> Self {
        Self {
            handle: None,
            partition: std::ptr::null(),
        }
    }
}

impl UpdateSink for EspOtaSink {
    fn begin(&mut self, len: usize) -> bool {
        unsafe {
            let partition = esp_idf_sys::esp_ota_get_next_update_partition(std::ptr::null());
            if partition.is_null() {
                warn!("no inactive ota partition available");
                return false;
            }
            let mut handle: esp_idf_sys::esp_ota_handle_t = 0;
            let err = esp_idf_sys::esp_ota_begin(partition, len, &mut handle);
            if err != esp_idf_sys::ESP_OK {
                warn!("esp_ota_begin failed: {err}");
                return false;
            }
            self.partition = partition;
            self.handle = Some(handle);
            true
        }
    }

    fn write(&mut self, chunk: &[u8]) -> usize {
        let Some(handle) = self.handle else {
            return 0;
        };
        let err = unsafe {
            esp_idf_sys::esp_ota_write(handle, chunk.as_ptr().cast(), chunk.len())
        };
        if err == esp_idf_sys::ESP_OK {
            chunk.len()
        } else {
            warn!("esp_ota_write failed: {err}");
            0
        }
    }

    fn finalize(&mut self) -> bool {
        let Some(handle) = self.handle.take() else {
            return false;
        };
        unsafe {
            let err = esp_idf_sys::esp_ota_end(handle);
            if err != esp_idf_sys::ESP_OK {
                warn!("esp_ota_end failed: {err}");
                return false;
            }
            let err = esp_idf_sys::esp_ota_set_boot_partition(self.partition);
            if err != esp_idf_sys::ESP_OK {
                warn!("esp_ota_set_boot_partition failed: {err}");
                return false;
            }
        }
        true
    }
}

struct EspSystem;

impl System for EspSystem {
    fn chip_id(&self) -> u32 {
        let mut mac = [0u8; 6];
        unsafe {
            esp_idf_sys::esp_read_mac(mac.as_mut_ptr(), esp_idf_sys::esp_mac_type_t_ESP_MAC_WIFI_STA);
        }
        u32::from_be_bytes([mac[2], mac[3], mac[4], mac[5]])
    }

    fn restart(&mut self) {
        unsafe { esp_idf_sys::esp_restart() }
    }

    fn erase_config(&mut self) {
        let err = unsafe { esp_idf_sys::esp_wifi_restore() };
        if err != esp_idf_sys::ESP_OK {
            warn!("esp_wifi_restore failed: {err}");
        }
    }

    fn reset(&mut self) {
        self.restart();
    }

    fn format_storage(&mut self) -> bool {
        unsafe { esp_idf_sys::nvs_flash_erase() == esp_idf_sys::ESP_OK }
    }
}

fn connect_wifi(
    modem: Modem,
    sysloop: EspSystemEventLoop,
    nvs: EspDefaultNvsPartition,
) -> anyhow::Result<BlockingWifi<EspWifi<'static>>> {
    let ssid = WIFI_SSID.ok_or_else(|| anyhow!("VIVARIUM_WIFI_SSID was not set at build time"))?;
    let pass = WIFI_PASS.unwrap_or("");

    let mut wifi = BlockingWifi::wrap(
        EspWifi::new(modem, sysloop.clone(), Some(nvs))?,
        sysloop,
    )?;
    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: ssid.try_into().map_err(|_| anyhow!("wifi ssid too long"))?,
        password: pass.try_into().map_err(|_| anyhow!("wifi password too long"))?,
        auth_method: if pass.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        },
        ..Default::default()
    }))?;
    wifi.start()?;

    let mut attempt = 0;
    loop {
        attempt += 1;
        match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
            Ok(()) => break,
            Err(err) if attempt < WIFI_CONNECT_ATTEMPTS => {
                warn!("wifi connect attempt {attempt} failed: {err}");
                FreeRtos::delay_ms(WIFI_RETRY_DELAY_MS);
            }
            Err(err) => return Err(err).context("connecting to wifi"),
        }
    }
    info!("wifi connected to {ssid}");
    Ok(wifi)
}

fn sync_time() -> anyhow::Result<EspSntp<'static>> {
    let sntp = EspSntp::new_default()?;
    let mut polls = 0;
    while sntp.get_sync_status() != SyncStatus::Completed {
        polls += 1;
        if polls > SNTP_SYNC_POLLS {
            warn!("sntp sync still pending, continuing with unsynced clock");
            break;
        }
        FreeRtos::delay_ms(500);
    }
    Ok(sntp)
}

fn load_config(partition: EspDefaultNvsPartition) -> DeviceConfig {
    let nvs = match EspNvs::new(partition, NVS_NAMESPACE, true) {
        Ok(nvs) => nvs,
        Err(err) => {
            warn!("could not open nvs namespace {NVS_NAMESPACE}: {err}");
            return DeviceConfig::default();
        }
    };
    let mut buf = [0u8; NVS_CONFIG_MAX];
    match nvs.get_str(NVS_CONFIG_KEY, &mut buf) {
        Ok(Some(json)) => serde_json::from_str(json).unwrap_or_else(|err| {
            warn!("stored configuration is invalid ({err}), using defaults");
            DeviceConfig::default()
        }),
        Ok(None) => {
            info!("no stored configuration, using defaults");
            DeviceConfig::default()
        }
        Err(err) => {
            warn!("could not read stored configuration: {err}");
            DeviceConfig::default()
        }
    }
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_sys::link_patches();
    EspLogger::initialize_default();

    let peripherals = Peripherals::take().context("taking peripherals")?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    let _wifi = connect_wifi(peripherals.modem, sysloop, nvs_partition.clone())?;
    let _sntp = sync_time()?;

    let config = load_config(nvs_partition);
    info!(
        "configuration: sht={} therms={} stats={} update={}",
        config.monitor.has_sht_sensor,
        config.monitor.num_therm_sensors,
        config.monitor.stats_url,
        config.update_url,
    );

    let port = EspI2cPort::init()?;
    let ow_pin = PinDriver::input_output_od(unsafe { AnyIOPin::new(ONE_WIRE_PIN) })
        .context("claiming one-wire pin")?;
    let bus = OneWire::new(ow_pin).map_err(|_| anyhow!("one-wire bus init failed"))?;
    let therms = EspTherms::enumerate(bus);

    let listener = TcpServer::bind(WEB_PORT).context("binding web interface")?;

    let mut monitor = VivariumMonitor::new(
        config.monitor,
        config.update_url,
        port,
        therms,
        RtosDelay,
        TcpNet,
        listener,
        EspOtaSink::default(),
        EspSystem,
    );
    crate::attach_handlers(&mut monitor);

    loop {
        monitor.tick(Utc::now().timestamp());
        FreeRtos::delay_ms(1_000);
    }
}
