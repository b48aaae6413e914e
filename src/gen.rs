use crate::attributes::md5_role_hash;
use rand::Rng;

const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ\
                         abcdefghijklmnopqrstuvwxyz\
                         0123456789)(*&^%$#@!~";

/// Random password of the given length.
pub fn random_password(length: u8) -> String {
    let mut rng = rand::thread_rng();

    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// Print a password, generated unless one is given, and the md5 hash
/// PostgreSQL would store for it when the user name is known. The hash can
/// be used as `password` in a user request.
pub fn gen_password(length: u8, username: Option<&str>, password: Option<&str>) -> Option<String> {
    let password = match password {
        Some(password) => password.to_string(),
        None => random_password(length),
    };
    println!("Generated password: {}", password);

    match username {
        Some(username) => {
            let hash = md5_role_hash(username, &password);
            println!("Generated MD5 (user: {}): {}", username, hash);
            Some(hash)
        }
        None => {
            println!("Hint: Please provide --username to generate MD5");
            None
        }
    }
}
