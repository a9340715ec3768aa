use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use crate::collation::CustomCollations;
use crate::error::Error;
use crate::spool::SpoolOpts;
use crate::value::ZeroDateBehavior;

/// Decoder configuration
///
/// ```rs
/// let opts = Opts::new(ZeroDateBehavior::Round);
///
/// let opts = Opts::try_from("mysql://localhost?zeroDateTimeBehavior=convertToNull&spoolDir=/var/tmp")?;
/// ```
#[derive(Debug, Clone)]
pub struct Opts {
    /// What a `0000-00-00` date decodes to. Always set explicitly.
    pub zero_date_behavior: ZeroDateBehavior,

    /// Temp file location and the sizes that trigger spooling
    pub spool: SpoolOpts,

    /// LOCAL INFILE requests are only served for files inside this directory.
    /// `None` refuses every request.
    pub local_infile_dir: Option<PathBuf>,

    /// Collation id to charset name, for collations missing from the built-in table
    pub custom_collations: Arc<CustomCollations>,
}

impl Opts {
    pub fn new(zero_date_behavior: ZeroDateBehavior) -> Self {
        Self {
            zero_date_behavior,
            spool: SpoolOpts::default(),
            local_infile_dir: None,
            custom_collations: Arc::new(CustomCollations::new()),
        }
    }
}

fn parse_size(key: &str, value: &str) -> Result<usize, Error> {
    value.parse().map_err(|e| {
        Error::BadConfigError(format!("Invalid {key} value '{value}': {e}"))
    })
}

impl TryFrom<&str> for Opts {
    type Error = Error;

    fn try_from(url: &str) -> Result<Self, Self::Error> {
        // Parse URL
        let parsed = url::Url::parse(url)
            .map_err(|e| Error::BadConfigError(format!("Failed to parse MySQL URL: {}", e)))?;

        // Verify scheme
        if parsed.scheme() != "mysql" {
            return Err(Error::BadConfigError(format!(
                "Invalid URL scheme '{}', expected 'mysql'",
                parsed.scheme()
            )));
        }

        let mut zero_date_behavior = None;
        let mut spool = SpoolOpts::default();
        let mut local_infile_dir = None;
        let mut custom_collations = CustomCollations::new();

        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "zeroDateTimeBehavior" => {
                    zero_date_behavior = Some(ZeroDateBehavior::from_str(&value)?);
                }
                "spoolDir" => spool.dir = PathBuf::from(value.as_ref()),
                "bigColumnThreshold" => {
                    spool.big_column_threshold = parse_size(&key, &value)?;
                }
                "maxInMemoryRowSize" => {
                    spool.max_in_memory_row_size = parse_size(&key, &value)?;
                }
                "localInfileDir" => local_infile_dir = Some(PathBuf::from(value.as_ref())),
                // collation=<id>:<charset>, repeatable
                "collation" => {
                    let (id, charset) = value.split_once(':').ok_or_else(|| {
                        Error::BadConfigError(format!(
                            "Invalid collation '{value}', expected '<id>:<charset>'"
                        ))
                    })?;
                    let id = id.parse().map_err(|e| {
                        Error::BadConfigError(format!("Invalid collation id '{id}': {e}"))
                    })?;
                    custom_collations.insert(id, charset.to_string());
                }
                _ => {
                    return Err(Error::BadConfigError(format!(
                        "Unknown URL parameter '{key}'"
                    )));
                }
            }
        }

        let zero_date_behavior = zero_date_behavior.ok_or_else(|| {
            Error::BadConfigError(
                "zeroDateTimeBehavior is required (exception, round or convertToNull)".to_string(),
            )
        })?;

        if spool.big_column_threshold == 0 {
            return Err(Error::BadConfigError(
                "bigColumnThreshold must be positive".to_string(),
            ));
        }

        Ok(Self {
            zero_date_behavior,
            spool,
            local_infile_dir,
            custom_collations: Arc::new(custom_collations),
        })
    }
}
