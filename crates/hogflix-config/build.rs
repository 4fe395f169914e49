fn main() {
    // option_env!() values are cached by cargo unless these are declared.
    println!("cargo:rerun-if-env-changed=SUPABASE_URL");
    println!("cargo:rerun-if-env-changed=SUPABASE_ANON_KEY");
    println!("cargo:rerun-if-env-changed=POSTHOG_API_KEY");
}
