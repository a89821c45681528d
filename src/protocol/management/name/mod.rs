//! SAE J1939-81 NAME field implementation (64 bits). The NAME uniquely
//! identifies an ECU on the network and is the currency of the
//! address-claim procedure: when two controllers contend for the same
//! address, the numerically lower NAME wins. The module provides a typed
//! wrapper around the raw `u64` plus total accessors/builders.
//!
//! # Bit layout (Little Endian order)
//!
//! ```text
//! Bits  0-20  (21 bits) : Identity number
//! Bits 21-31  (11 bits) : Manufacturer code
//! Bits 32-34  ( 3 bits) : ECU instance
//! Bits 35-39  ( 5 bits) : Function instance
//! Bits 40-47  ( 8 bits) : Function
//! Bit  48     ( 1 bit ) : Reserved
//! Bits 49-55  ( 7 bits) : Device class (vehicle system)
//! Bits 56-59  ( 4 bits) : Device class instance
//! Bits 60-62  ( 3 bits) : Industry group
//! Bit  63     ( 1 bit ) : Self-configurable address (arbitrary address capable)
//! ```

use core::fmt;

/// Wrapper around the J1939 NAME field (64 bits).
///
/// NAMEs order as unsigned 64-bit integers; a *lower* value has *higher*
/// arbitration priority on the bus. The derived `Ord`/`Hash` make the type
/// usable directly as a map key.
///
/// # Example
///
/// ```
/// use korri_j1939::protocol::management::name::Name;
///
/// let name = Name::builder()
///     .identity_number(123456)
///     .manufacturer_code(275)
///     .function(130)
///     .device_class(25)
///     .self_config_address(true)
///     .build();
///
/// assert_eq!(name.identity_number(), 123456);
/// assert_eq!(name.manufacturer_code(), 275);
/// assert!(name.self_config_address());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Name(u64);

impl Name {
    /// Build a `Name` from the raw value.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Return the underlying `u64`.
    #[inline]
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// Decode a `Name` from an 8-byte frame payload (little endian,
    /// byte 0 = bits 7..0).
    #[inline]
    pub const fn from_payload(payload: [u8; 8]) -> Self {
        Self(u64::from_le_bytes(payload))
    }

    /// Serialize into an 8-byte frame payload (little endian).
    #[inline]
    pub const fn to_payload(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Create a builder to construct a `Name`.
    #[inline]
    pub const fn builder() -> NameBuilder {
        NameBuilder::new()
    }

    // Individual accessors for NAME sub-fields.

    /// Identity number (bits 0-20, 21 bits).
    ///
    /// Identifies the unit within the manufacturer lineup.
    #[inline]
    pub const fn identity_number(&self) -> u32 {
        (self.0 & 0x1F_FFFF) as u32
    }

    /// Manufacturer code (bits 21-31, 11 bits).
    #[inline]
    pub const fn manufacturer_code(&self) -> u16 {
        ((self.0 >> 21) & 0x7FF) as u16
    }

    /// ECU instance (bits 32-34, 3 bits).
    #[inline]
    pub const fn ecu_instance(&self) -> u8 {
        ((self.0 >> 32) & 0x07) as u8
    }

    /// Function instance (bits 35-39, 5 bits).
    #[inline]
    pub const fn function_instance(&self) -> u8 {
        ((self.0 >> 35) & 0x1F) as u8
    }

    /// Function (bits 40-47, 8 bits).
    #[inline]
    pub const fn function(&self) -> u8 {
        ((self.0 >> 40) & 0xFF) as u8
    }

    /// Reserved bit (bit 48).
    #[inline]
    pub const fn reserved(&self) -> bool {
        ((self.0 >> 48) & 0x01) != 0
    }

    /// Device class / vehicle system (bits 49-55, 7 bits).
    #[inline]
    pub const fn device_class(&self) -> u8 {
        ((self.0 >> 49) & 0x7F) as u8
    }

    /// Device class instance / vehicle system instance (bits 56-59, 4 bits).
    #[inline]
    pub const fn device_class_instance(&self) -> u8 {
        ((self.0 >> 56) & 0x0F) as u8
    }

    /// Industry group (bits 60-62, 3 bits).
    #[inline]
    pub const fn industry_group(&self) -> u8 {
        ((self.0 >> 60) & 0x07) as u8
    }

    /// Self-configurable address bit (bit 63).
    ///
    /// Indicates whether the ECU may claim an arbitrary address instead of
    /// insisting on its preferred one.
    #[inline]
    pub const fn self_config_address(&self) -> bool {
        ((self.0 >> 63) & 0x01) != 0
    }
}

impl From<u64> for Name {
    #[inline]
    fn from(raw: u64) -> Self {
        Self::from_raw(raw)
    }
}

impl From<Name> for u64 {
    #[inline]
    fn from(name: Name) -> Self {
        name.raw()
    }
}

impl From<[u8; 8]> for Name {
    #[inline]
    fn from(payload: [u8; 8]) -> Self {
        Self::from_payload(payload)
    }
}

impl From<Name> for [u8; 8] {
    #[inline]
    fn from(name: Name) -> Self {
        name.to_payload()
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Name {{ id: {}, mfg: {}, func: {}, class: {}, ecu: {}, scfg: {} }}",
            self.identity_number(),
            self.manufacturer_code(),
            self.function(),
            self.device_class(),
            self.ecu_instance(),
            self.self_config_address()
        )
    }
}

/// Fluent builder used to construct a `Name`.
///
/// Construction is total: every setter masks its value to the field width,
/// so out-of-range inputs are truncated rather than rejected.
///
/// # Example
///
/// ```
/// use korri_j1939::protocol::management::name::Name;
///
/// let name = Name::builder()
///     .identity_number(12345)
///     .manufacturer_code(275)
///     .self_config_address(true)
///     .build();
/// ```
#[derive(Debug, Clone, Copy)]
pub struct NameBuilder {
    raw: u64,
}

impl NameBuilder {
    /// Initialize the builder with all fields cleared.
    #[inline]
    pub const fn new() -> Self {
        Self { raw: 0 }
    }

    /// Set the identity number (bits 0-20, 21 bits).
    #[inline]
    pub const fn identity_number(mut self, value: u32) -> Self {
        self.raw = (self.raw & !0x1F_FFFF) | (value as u64 & 0x1F_FFFF);
        self
    }

    /// Set the manufacturer code (bits 21-31, 11 bits).
    #[inline]
    pub const fn manufacturer_code(mut self, value: u16) -> Self {
        self.raw = (self.raw & !(0x7FF << 21)) | ((value as u64 & 0x7FF) << 21);
        self
    }

    /// Set the ECU instance (bits 32-34, 3 bits).
    #[inline]
    pub const fn ecu_instance(mut self, value: u8) -> Self {
        self.raw = (self.raw & !(0x07 << 32)) | ((value as u64 & 0x07) << 32);
        self
    }

    /// Set the function instance (bits 35-39, 5 bits).
    #[inline]
    pub const fn function_instance(mut self, value: u8) -> Self {
        self.raw = (self.raw & !(0x1F << 35)) | ((value as u64 & 0x1F) << 35);
        self
    }

    /// Set the function (bits 40-47, 8 bits).
    #[inline]
    pub const fn function(mut self, value: u8) -> Self {
        self.raw = (self.raw & !(0xFF << 40)) | ((value as u64) << 40);
        self
    }

    /// Update the reserved bit (bit 48).
    #[inline]
    pub const fn reserved(mut self, value: bool) -> Self {
        self.raw = (self.raw & !(0x01 << 48)) | ((value as u64) << 48);
        self
    }

    /// Set the device class / vehicle system (bits 49-55, 7 bits).
    #[inline]
    pub const fn device_class(mut self, value: u8) -> Self {
        self.raw = (self.raw & !(0x7F << 49)) | ((value as u64 & 0x7F) << 49);
        self
    }

    /// Set the device class instance (bits 56-59, 4 bits).
    #[inline]
    pub const fn device_class_instance(mut self, value: u8) -> Self {
        self.raw = (self.raw & !(0x0F << 56)) | ((value as u64 & 0x0F) << 56);
        self
    }

    /// Set the industry group (bits 60-62, 3 bits).
    #[inline]
    pub const fn industry_group(mut self, value: u8) -> Self {
        self.raw = (self.raw & !(0x07 << 60)) | ((value as u64 & 0x07) << 60);
        self
    }

    /// Configure the self-configurable address bit (bit 63).
    #[inline]
    pub const fn self_config_address(mut self, value: bool) -> Self {
        self.raw = (self.raw & !(0x01 << 63)) | ((value as u64) << 63);
        self
    }

    /// Build the final `Name`.
    #[inline]
    pub const fn build(self) -> Name {
        Name(self.raw)
    }
}

impl Default for NameBuilder {
    fn default() -> Self {
        Self::new()
    }
}
