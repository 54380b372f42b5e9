/// A named synthesis voice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Voice {
    /// Display name
    pub name: &'static str,
    /// Identifier sent to the service
    pub id: &'static str,
}

const fn voice(name: &'static str, id: &'static str) -> Voice {
    Voice { name, id }
}

/// Voices offered by the service
pub const VOICES: &[Voice] = &[
    voice("Bella", "af_bella"),
    voice("Nicole", "af_nicole"),
    voice("Sarah", "af_sarah"),
    voice("Sky", "af_sky"),
    voice("Adam", "am_adam"),
    voice("Michael", "am_michael"),
    voice("Emma", "bf_emma"),
    voice("Isabella", "bf_isabella"),
    voice("George", "bm_george"),
    voice("Lewis", "bm_lewis"),
];

/// Look up a voice id by display name (case-insensitive)
pub fn voice_id(name: &str) -> Option<&'static str> {
    VOICES
        .iter()
        .find(|v| v.name.eq_ignore_ascii_case(name))
        .map(|v| v.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog() {
        assert_eq!(VOICES.len(), 10);
        assert_eq!(VOICES[0], voice("Bella", "af_bella"));
        assert_eq!(VOICES[9].id, "bm_lewis");
    }

    #[test]
    fn test_voice_id_lookup() {
        assert_eq!(voice_id("Isabella"), Some("bf_isabella"));
        assert_eq!(voice_id("george"), Some("bm_george"));
        assert_eq!(voice_id("Nobody"), None);
    }
}
