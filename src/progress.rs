use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar shared by the frame pool and the scrape loop
pub fn progress_bar(len: usize, message: &str) -> ProgressBar {
    let style = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");

    let bar = ProgressBar::new(len as u64);
    bar.set_style(style);
    bar.set_message(message.to_string());
    bar
}
