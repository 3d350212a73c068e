//! Version of the running build

/// Version string of this build; `STRATUS_VERSION` at compile time wins
pub const VERSION: &str = match option_env!("STRATUS_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};

/// Image repository of the controller
pub const CONTROLLER_IMAGE_REPOSITORY: &str = "stratus/controller";

/// Controller image for `version`
pub fn controller_image(version: &str) -> String {
    format!("{}:{}", CONTROLLER_IMAGE_REPOSITORY, version)
}

/// Tag part of an image reference, e.g. `1.2.0` for `stratus/controller:1.2.0`
pub fn image_tag(image: &str) -> &str {
    image.rsplit(':').next().unwrap_or(image)
}
