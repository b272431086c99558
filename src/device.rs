//! Device information as recorded by the app engine.

use std::collections::HashMap;

use crate::database::AppEngineDb;
use crate::error::Result;

const DEVICE_INFO_QUERY: &str = "SELECT deviceKey, deviceValue FROM device";

impl AppEngineDb {
    /// Returns the device information key/value pairs, such as `deviceName`
    /// and `ownerEmail`.
    ///
    /// A `NULL` value comes back as an empty string. Should a key occur more
    /// than once, the last row wins.
    pub fn device_info(&self) -> Result<HashMap<String, String>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(DEVICE_INFO_QUERY)?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                ))
            })?;
            Ok(rows.collect::<rusqlite::Result<_>>()?)
        })
    }
}
