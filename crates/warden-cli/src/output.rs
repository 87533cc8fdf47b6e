//! Output formatting for request results.

/// Prints a loop device path in the form scripts expect.
#[allow(clippy::print_stdout)]
pub fn print_loop_device(number: u32) {
    println!("/dev/loop{number}");
}

/// Prints a one-line success confirmation.
#[allow(clippy::print_stdout)]
pub fn print_done(what: &str) {
    println!("ok: {what}");
}
