//! CKKS layer: context derivation from the wire options block, client-side
//! key material and row encrypt/decrypt, and the worker-side evaluator with
//! the homomorphic multiply kernel.
//!
//! Everything backend-specific stays inside this module; the protocol and
//! session layers only ever see the 16-byte options block and opaque byte
//! strings for keys and ciphertexts.

use seal_fhe::{
    CKKSEncoder, CKKSEvaluator, Ciphertext, CkksEncryptionParametersBuilder, CoefficientModulus,
    Context, Decryptor, DegreeType, Encryptor, Evaluator, FromBytes, GaloisKeys, KeyGenerator,
    Plaintext, PublicKey, RelinearizationKeys, SecurityLevel, ToBytes,
};

use crate::error::{Error, Result};

/// Context parameters, sent as one 16-byte block so both ends construct
/// identical contexts. `m` is four times the logical slot count, `precision`
/// fixes the encoding scales, `c` the number of interior coefficient primes,
/// and `bits` the requested ciphertext modulus budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CkksOptions {
    pub m: u32,
    pub bits: u32,
    pub precision: u32,
    pub c: u32,
}

impl CkksOptions {
    pub const WIRE_SIZE: usize = 16;

    /// Canonical options for multiplying square matrices of side `n`.
    pub fn for_side(n: usize) -> Self {
        Self {
            m: 4 * n as u32,
            bits: 119,
            precision: 20,
            c: 2,
        }
    }

    /// Logical slot count: one matrix row of up to `m / 4` values per
    /// ciphertext.
    pub fn slots(&self) -> usize {
        (self.m / 4) as usize
    }

    pub fn to_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        buf[0..4].copy_from_slice(&self.m.to_le_bytes());
        buf[4..8].copy_from_slice(&self.bits.to_le_bytes());
        buf[8..12].copy_from_slice(&self.precision.to_le_bytes());
        buf[12..16].copy_from_slice(&self.c.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; Self::WIRE_SIZE]) -> Self {
        Self {
            m: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            bits: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            precision: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            c: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
        }
    }

    /// Polynomial degree backing the context. Real slot capacity is half of
    /// this, which always covers the logical slot count.
    fn degree(&self) -> u32 {
        (self.m / 2).max(8192)
    }

    /// Fresh-ciphertext scale.
    fn scale(&self) -> f64 {
        2f64.powi(2 * self.precision as i32)
    }

    /// Scale of the slot-placement mask. Kept smaller than the data scale so
    /// masked products stay well inside the modulus without rescaling.
    fn mask_scale(&self) -> f64 {
        2f64.powi(self.precision as i32)
    }

    fn validate(&self) -> Result<()> {
        if self.m < 4 || !self.m.is_power_of_two() {
            return Err(Error::BadOptions("m must be a power of two, at least 4"));
        }
        if self.degree() > 32768 {
            return Err(Error::BadOptions("m exceeds the largest supported ring"));
        }
        if self.precision == 0 || self.precision > 30 {
            return Err(Error::BadOptions("precision out of range"));
        }
        if self.c == 0 || self.c > 8 {
            return Err(Error::BadOptions("c out of range"));
        }
        if 60 + self.c * 2 * self.precision < self.bits {
            return Err(Error::BadOptions("bits exceed the derived modulus budget"));
        }
        Ok(())
    }

    fn degree_type(&self) -> Result<DegreeType> {
        match self.degree() {
            1024 => Ok(DegreeType::D1024),
            2048 => Ok(DegreeType::D2048),
            4096 => Ok(DegreeType::D4096),
            8192 => Ok(DegreeType::D8192),
            16384 => Ok(DegreeType::D16384),
            32768 => Ok(DegreeType::D32768),
            _ => Err(Error::BadOptions("unsupported ring degree")),
        }
    }

    fn build_context(&self) -> Result<Context> {
        self.validate()?;
        let degree = self.degree_type()?;
        let mut bit_sizes = vec![60i32];
        bit_sizes.extend(std::iter::repeat(2 * self.precision as i32).take(self.c as usize));
        bit_sizes.push(60);
        let params = CkksEncryptionParametersBuilder::new()
            .set_poly_modulus_degree(degree)
            .set_coefficient_modulus(CoefficientModulus::create(degree, &bit_sizes)?)
            .build()?;
        Ok(Context::new(&params, true, SecurityLevel::TC128)?)
    }
}

/// Serialize public material as three inner length-prefixed components:
/// public key, relinearization keys, Galois keys. The worker needs all three
/// to evaluate, and the bundle travels as one wire frame.
fn pack_key_set(parts: [&[u8]; 3]) -> Vec<u8> {
    let total: usize = parts.iter().map(|p| 4 + p.len()).sum();
    let mut out = Vec::with_capacity(total);
    for part in parts {
        out.extend_from_slice(&(part.len() as u32).to_le_bytes());
        out.extend_from_slice(part);
    }
    out
}

fn unpack_key_set(bytes: &[u8]) -> Result<[&[u8]; 3]> {
    let mut rest = bytes;
    let mut parts = [&bytes[0..0]; 3];
    for slot in parts.iter_mut() {
        if rest.len() < 4 {
            return Err(Error::BadKeyMaterial);
        }
        let len = u32::from_le_bytes(rest[..4].try_into().unwrap()) as usize;
        rest = &rest[4..];
        if rest.len() < len {
            return Err(Error::BadKeyMaterial);
        }
        *slot = &rest[..len];
        rest = &rest[len..];
    }
    if !rest.is_empty() {
        return Err(Error::BadKeyMaterial);
    }
    Ok(parts)
}

/// Client-side key material. The secret key stays inside the `Decryptor`
/// and never crosses the wire.
pub struct ClientCrypto {
    context: Context,
    encoder: CKKSEncoder,
    encryptor: Encryptor,
    decryptor: Decryptor,
    public_bytes: Vec<u8>,
}

impl ClientCrypto {
    pub fn new(options: &CkksOptions) -> Result<Self> {
        let context = options.build_context()?;
        let keygen = KeyGenerator::new(&context)?;
        let secret_key = keygen.secret_key();
        let public_key = keygen.create_public_key();
        let relin_keys = keygen.create_relinearization_keys()?;
        let galois_keys = keygen.create_galois_keys()?;

        let public_bytes = pack_key_set([
            &public_key.as_bytes()?,
            &relin_keys.as_bytes()?,
            &galois_keys.as_bytes()?,
        ]);

        let encoder = CKKSEncoder::new(&context, options.scale())?;
        let encryptor = Encryptor::with_public_key(&context, &public_key)?;
        let decryptor = Decryptor::new(&context, &secret_key)?;

        Ok(Self {
            context,
            encoder,
            encryptor,
            decryptor,
            public_bytes,
        })
    }

    /// Serialized public material for the key frame sent to every worker.
    pub fn public_bytes(&self) -> &[u8] {
        &self.public_bytes
    }

    /// Encrypt one matrix row into an opaque ciphertext frame payload.
    pub fn encrypt_row(&self, row: &[f64]) -> Result<Vec<u8>> {
        let plain = self.encoder.encode_f64(row)?;
        let cipher = self.encryptor.encrypt(&plain)?;
        Ok(cipher.as_bytes()?)
    }

    /// Decrypt one ciphertext frame payload and keep the first `columns`
    /// slots; anything beyond them is placement residue.
    pub fn decrypt_row(&self, bytes: &[u8], columns: usize) -> Result<Vec<f64>> {
        let cipher = Ciphertext::from_bytes(&self.context, bytes)?;
        let plain = self.decryptor.decrypt(&cipher)?;
        let mut values = self.encoder.decode_f64(&plain)?;
        values.truncate(columns);
        Ok(values)
    }
}

/// Worker-side evaluator rebuilt per homomorphic request from the options
/// block and the client's public material.
pub struct EvalCrypto {
    context: Context,
    evaluator: CKKSEvaluator,
    relin_keys: RelinearizationKeys,
    galois_keys: GaloisKeys,
    unit_mask: Plaintext,
    slot_capacity: usize,
}

impl EvalCrypto {
    pub fn new(options: &CkksOptions, key_bytes: &[u8]) -> Result<Self> {
        let context = options.build_context()?;
        let [public, relin, galois] = unpack_key_set(key_bytes)?;
        // The public key itself is not used for evaluation but the frame is
        // validated as a whole.
        PublicKey::from_bytes(&context, public)?;
        let relin_keys = RelinearizationKeys::from_bytes(&context, relin)?;
        let galois_keys = GaloisKeys::from_bytes(&context, galois)?;

        let mask_encoder = CKKSEncoder::new(&context, options.mask_scale())?;
        let unit_mask = mask_encoder.encode_f64(&[1.0])?;
        let evaluator = CKKSEvaluator::new(&context)?;

        Ok(Self {
            context,
            evaluator,
            relin_keys,
            galois_keys,
            unit_mask,
            slot_capacity: options.degree() as usize / 2,
        })
    }

    pub fn read_ciphertext(&self, bytes: &[u8]) -> Result<Ciphertext> {
        Ok(Ciphertext::from_bytes(&self.context, bytes)?)
    }

    pub fn write_ciphertext(&self, cipher: &Ciphertext) -> Result<Vec<u8>> {
        Ok(cipher.as_bytes()?)
    }

    /// Slotwise ciphertext addition.
    pub fn add(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
        Ok(self.evaluator.add(a, b)?)
    }

    /// One output row of the homomorphic product: `v` is an encrypted row of
    /// `A`, `bt` the encrypted rows of the transposed right operand. For each
    /// `j` the slotwise product `v ⊙ bt[j]` is reduced with total sums and the
    /// resulting scalar placed into slot `j` of the accumulator, so slot `j`
    /// of the returned ciphertext holds `(A * B)[i, j]`.
    pub fn row_times_matrix(&self, v: &Ciphertext, bt: &[Ciphertext]) -> Result<Ciphertext> {
        assert!(!bt.is_empty(), "empty right operand");
        let mut result: Option<Ciphertext> = None;
        for (j, column) in bt.iter().enumerate() {
            let mut product = self.evaluator.multiply(v, column)?;
            self.evaluator
                .relinearize_inplace(&mut product, &self.relin_keys)?;
            let summed = self.total_sums(&product)?;
            let placed = self.shift_into_slot(&summed, j)?;
            match result.as_mut() {
                None => result = Some(placed),
                Some(acc) => self.evaluator.add_inplace(acc, &placed)?,
            }
        }
        Ok(result.expect("at least one column"))
    }

    /// Rotate-and-add until every slot holds the sum of all slots.
    fn total_sums(&self, cipher: &Ciphertext) -> Result<Ciphertext> {
        let mut acc = cipher.clone();
        let mut step = 1usize;
        while step < self.slot_capacity {
            let rotated = self
                .evaluator
                .rotate_vector(&acc, step as i32, &self.galois_keys)?;
            self.evaluator.add_inplace(&mut acc, &rotated)?;
            step <<= 1;
        }
        Ok(acc)
    }

    /// Keep slot 0 only, then rotate it into position `slot`. The mask makes
    /// the per-column terms slot-disjoint so accumulation stays pure.
    fn shift_into_slot(&self, cipher: &Ciphertext, slot: usize) -> Result<Ciphertext> {
        let masked = self.evaluator.multiply_plain(cipher, &self.unit_mask)?;
        if slot == 0 {
            return Ok(masked);
        }
        Ok(self
            .evaluator
            .rotate_vector(&masked, -(slot as i32), &self.galois_keys)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{relative_l1_error, Matrix};

    #[test]
    fn options_wire_layout() {
        let options = CkksOptions::for_side(4);
        assert_eq!(
            options,
            CkksOptions {
                m: 16,
                bits: 119,
                precision: 20,
                c: 2
            }
        );
        let bytes = options.to_bytes();
        assert_eq!(bytes[0..4], 16u32.to_le_bytes());
        assert_eq!(bytes[4..8], 119u32.to_le_bytes());
        assert_eq!(CkksOptions::from_bytes(&bytes), options);
    }

    #[test]
    fn options_validation() {
        assert!(CkksOptions::for_side(4).validate().is_ok());
        let crooked = CkksOptions {
            m: 12,
            ..CkksOptions::for_side(4)
        };
        assert!(crooked.validate().is_err());
        let starved = CkksOptions {
            bits: 200,
            ..CkksOptions::for_side(4)
        };
        assert!(starved.validate().is_err());
    }

    #[test]
    fn key_set_framing_roundtrip() {
        let packed = pack_key_set([b"public", b"relin", b"galois-material"]);
        let [p, r, g] = unpack_key_set(&packed).unwrap();
        assert_eq!(p, b"public");
        assert_eq!(r, b"relin");
        assert_eq!(g, b"galois-material");
        assert!(unpack_key_set(&packed[..packed.len() - 1]).is_err());
        assert!(unpack_key_set(b"\x01").is_err());
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let options = CkksOptions::for_side(4);
        let client = ClientCrypto::new(&options).unwrap();
        let row = [1.5, -2.0, 3.25, 0.0];
        let frame = client.encrypt_row(&row).unwrap();
        let back = client.decrypt_row(&frame, row.len()).unwrap();
        assert_eq!(back.len(), row.len());
        for (expected, actual) in row.iter().zip(&back) {
            assert!((expected - actual).abs() < 1e-3, "{expected} vs {actual}");
        }
    }

    #[test]
    fn homomorphic_add_matches_plain() {
        let options = CkksOptions::for_side(4);
        let client = ClientCrypto::new(&options).unwrap();
        let eval = EvalCrypto::new(&options, client.public_bytes()).unwrap();

        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [10.0, 20.0, 30.0, 40.0];
        let ca = eval
            .read_ciphertext(&client.encrypt_row(&a).unwrap())
            .unwrap();
        let cb = eval
            .read_ciphertext(&client.encrypt_row(&b).unwrap())
            .unwrap();
        let sum = eval.add(&ca, &cb).unwrap();
        let back = client
            .decrypt_row(&eval.write_ciphertext(&sum).unwrap(), 4)
            .unwrap();
        for (k, value) in back.iter().enumerate() {
            assert!((value - (a[k] + b[k])).abs() < 1e-2, "slot {k}: {value}");
        }
    }

    #[test]
    fn kernel_matches_plain_product() {
        let n = 4;
        let options = CkksOptions::for_side(n);
        let client = ClientCrypto::new(&options).unwrap();
        let eval = EvalCrypto::new(&options, client.public_bytes()).unwrap();

        let a = Matrix::from_vec(
            vec![
                1.0, -2.0, 3.0, 0.0, //
                2.0, 1.0, -1.0, 2.0, //
                0.0, 3.0, 1.0, -3.0, //
                -1.0, 0.0, 2.0, 1.0,
            ],
            n,
        );
        let b = Matrix::from_vec(
            vec![
                2.0, 0.0, 1.0, -1.0, //
                1.0, 3.0, 0.0, 2.0, //
                -2.0, 1.0, 2.0, 0.0, //
                0.0, -1.0, 1.0, 3.0,
            ],
            n,
        );
        let bt = b.transposed();

        let bt_cts: Vec<_> = (0..n)
            .map(|j| {
                eval.read_ciphertext(&client.encrypt_row(bt.row(j)).unwrap())
                    .unwrap()
            })
            .collect();

        let mut out = Matrix::new(n, n);
        for i in 0..n {
            let v = eval
                .read_ciphertext(&client.encrypt_row(a.row(i)).unwrap())
                .unwrap();
            let r = eval.row_times_matrix(&v, &bt_cts).unwrap();
            let row = client
                .decrypt_row(&eval.write_ciphertext(&r).unwrap(), n)
                .unwrap();
            for (j, value) in row.iter().enumerate() {
                out.set(i, j, *value);
            }
        }

        let expected = &a * &b;
        let err = relative_l1_error(&expected, &out);
        assert!(err < 1e-2, "relative error {err}");
    }
}
