//! Device driver trait

use crate::Result;
use crate::schema::{Arguments, CommandTable};
use crate::types::{Command, Packet};

/// A pluggable perimeter driver.
///
/// The dispatcher validates every request against [`Driver::commands`] before
/// calling the matching capability, so implementations receive well-formed
/// [`Arguments`] with defaults applied. Errors returned here reach the client
/// as `InvocationFailed` packets.
///
/// Commands a driver does not list in its table still validate (with no
/// parameters); the default implementations answer them with a plain
/// acknowledgement.
#[async_trait::async_trait]
pub trait Driver: Send + 'static {
    /// Machine name, as given to CHOOSE.
    fn name(&self) -> &'static str;

    /// Immutable command table of this machine.
    fn commands(&self) -> &'static CommandTable;

    /// Connect to the device and prepare it for use.
    async fn initialize(&mut self, args: &Arguments) -> Result<Packet>;

    /// Describe the machine. Defaults to the command table metadata.
    async fn query(&mut self, _args: &Arguments) -> Result<Packet> {
        Ok(Packet::object(self.commands().to_json()))
    }

    async fn setup(&mut self, args: &Arguments) -> Result<Packet>;

    async fn present(&mut self, args: &Arguments) -> Result<Packet>;

    /// Release the device. Called at most once per driver instance.
    async fn close(&mut self, args: &Arguments) -> Result<Packet>;
}

/// Route a validated command to the matching capability.
pub(crate) async fn invoke(driver: &mut dyn Driver, args: &Arguments) -> Result<Packet> {
    match args.command() {
        Command::Initialize => driver.initialize(args).await,
        Command::Query => driver.query(args).await,
        Command::Setup => driver.setup(args).await,
        Command::Present => driver.present(args).await,
        Command::Close => driver.close(args).await,
        Command::Choose => Ok(Packet::text(format!("{} is already chosen", driver.name()))),
    }
}

/// Bookkeeping shared by every driver, embedded by value.
#[derive(Debug, Clone, Default)]
pub struct MachineState {
    initialized: bool,
    presentations: u64,
}

impl MachineState {
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    pub fn mark_closed(&mut self) {
        self.initialized = false;
    }

    /// Count a presentation and return its 1-based number.
    pub fn next_presentation(&mut self) -> u64 {
        self.presentations += 1;
        self.presentations
    }

    pub fn presentations(&self) -> u64 {
        self.presentations
    }

    /// Fail unless INITIALIZE has succeeded.
    pub fn require_initialized(&self, machine: &str) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(crate::MonitorError::device(format!("{machine} has not been initialized")))
        }
    }
}
