/// Assert a snapshot with a set of filters applied.
#[macro_export]
macro_rules! assert_snapshot_filtered {
    ($output:expr, $filters:expr, @$expected:literal) => {
        insta::with_settings!({filters => $filters.clone()}, {
            insta::assert_snapshot!($output, @$expected);
        });
    };
}

/// Run a command and capture its stdout.
#[macro_export]
macro_rules! run_and_capture {
    ($cmd:expr) => {{
        let mut out = Vec::new();
        $cmd(&mut out).await?;
        String::from_utf8(out)?
    }};
}
