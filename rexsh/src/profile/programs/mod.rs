//! Built-in program profiles.

pub mod database;
pub mod metasploit;
pub mod python;

use super::ProgramProfile;

/// All built-in profiles, in detection order.
pub fn builtin() -> Vec<ProgramProfile> {
    vec![
        metasploit::profile(),
        python::profile(),
        database::mysql(),
        database::psql(),
        database::sqlite(),
    ]
}
