//! Single-threaded tick orchestrator tying the subsystems together.

use log::info;

use crate::config::{MonitorConfig, Url};
use crate::hal::{Connector, Delay, I2cPort, Listener, System, Thermometers, UpdateSink};
use crate::ota::FirmwareUpdater;
use crate::outputs::ActuatorWriter;
use crate::sensors::SensorHub;
use crate::stats::StatsReporter;
use crate::types::SensorData;
use crate::web::serve_once;

/// Control callback: maps the current readings and tick time to an output
/// value. Registered per output channel.
pub type OutputHandler = Box<dyn FnMut(SensorData, i64) -> u8>;

/// Owns the hardware handles and drives one pass of the control loop per
/// [`tick`](VivariumMonitor::tick). Everything runs on the caller's
/// thread; nothing here blocks longer than one network timeout.
pub struct VivariumMonitor<P, T, D, N, L, U, S>
where
    P: I2cPort,
    T: Thermometers,
    D: Delay,
    N: Connector,
    L: Listener,
    U: UpdateSink,
    S: System,
{
    config: MonitorConfig,
    port: P,
    therms: T,
    delay: D,
    net: N,
    listener: L,
    sink: U,
    sys: S,
    sensors: SensorHub,
    outputs: ActuatorWriter,
    stats: StatsReporter,
    updater: FirmwareUpdater,
    analog_handler: Option<OutputHandler>,
    digital_one_handler: Option<OutputHandler>,
    digital_two_handler: Option<OutputHandler>,
}

impl<P, T, D, N, L, U, S> VivariumMonitor<P, T, D, N, L, U, S>
where
    P: I2cPort,
    T: Thermometers,
    D: Delay,
    N: Connector,
    L: Listener,
    U: UpdateSink,
    S: System,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: MonitorConfig,
        update_url: Url,
        port: P,
        mut therms: T,
        delay: D,
        net: N,
        listener: L,
        sink: U,
        sys: S,
    ) -> Self {
        let mut sensors = SensorHub::new(&config);
        sensors.init(&mut therms);
        let stats = StatsReporter::new(sys.chip_id());
        info!("vivarium monitor initialized, device id {}", sys.chip_id());
        Self {
            config,
            port,
            therms,
            delay,
            net,
            listener,
            sink,
            sys,
            sensors,
            outputs: ActuatorWriter::new(),
            stats,
            updater: FirmwareUpdater::new(update_url),
            analog_handler: None,
            digital_one_handler: None,
            digital_two_handler: None,
        }
    }

    pub fn set_analog_handler(&mut self, handler: OutputHandler) {
        self.analog_handler = Some(handler);
    }

    pub fn set_digital_one_handler(&mut self, handler: OutputHandler) {
        self.digital_one_handler = Some(handler);
    }

    pub fn set_digital_two_handler(&mut self, handler: OutputHandler) {
        self.digital_two_handler = Some(handler);
    }

    /// One pass of the control loop: sample, run the output handlers, push
    /// actuator state, then do the network chores.
    pub fn tick(&mut self, now: i64) {
        let readings = self
            .sensors
            .read_sensors(now, &mut self.port, &mut self.therms, &mut self.delay);

        if let Some(handler) = &mut self.analog_handler {
            self.outputs.set_analog(handler(readings, now));
        }
        if let Some(handler) = &mut self.digital_one_handler {
            self.outputs.set_digital_one(handler(readings, now));
        }
        if let Some(handler) = &mut self.digital_two_handler {
            self.outputs.set_digital_two(handler(readings, now));
        }
        self.outputs.write_outputs(&mut self.port, &mut self.delay);

        let state = self.outputs.state();
        self.stats.post_stats(
            &readings,
            state.digital_1,
            state.digital_2,
            state.analog,
            &self.config,
            &mut self.net,
        );
        self.updater
            .update_firmware(now, &mut self.net, &mut self.sink, &mut self.sys);
        serve_once(
            &mut self.listener,
            &mut self.sys,
            &self.config,
            self.updater.url(),
            self.updater.last_check(),
        );
    }
}
