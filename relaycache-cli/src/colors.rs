use colored::CustomColor;

/// Catppuccin Mocha color palette.
pub fn lavender() -> CustomColor {
    CustomColor::new(180, 190, 254)
}

pub fn green() -> CustomColor {
    CustomColor::new(166, 227, 161)
}

pub fn red() -> CustomColor {
    CustomColor::new(243, 139, 168)
}
