use sha1::{Digest, Sha1};

fn sha1(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// mysql_native_password scramble:
/// `SHA1(password) XOR SHA1(salt || SHA1(SHA1(password)))`.
/// An empty password yields an empty response.
pub fn scramble_native_password(password: &[u8], salt: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let password_hash = sha1(password);
    let double_hash = sha1(&password_hash);
    let mut salted = Vec::with_capacity(salt.len() + double_hash.len());
    salted.extend_from_slice(salt);
    salted.extend_from_slice(&double_hash);
    let salted_hash = sha1(&salted);
    password_hash
        .iter()
        .zip(salted_hash.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}
