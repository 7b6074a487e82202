use rand::Rng;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The alphabet sandbox ids are drawn from. Lowercase keeps ids usable as
/// image tags and container names without mangling.
const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// The length of a sandbox id.
const ID_LENGTH: usize = 10;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Generates a fresh sandbox id from a collision-resistant random source.
pub fn generate_sandbox_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LENGTH)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_shape() {
        let id = generate_sandbox_id();
        assert_eq!(id.len(), 10);
        assert!(id.bytes().all(|b| ID_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_ids_are_distinct() {
        let a = generate_sandbox_id();
        let b = generate_sandbox_id();
        assert_ne!(a, b);
    }
}
