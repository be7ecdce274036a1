fn main() {
    completion_pipeline::cli::run();
}
