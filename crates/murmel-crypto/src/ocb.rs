//! OCB2-Kern ueber AES-128
//!
//! Der Modus arbeitet blockweise mit einem Delta-Offset, der pro Block in
//! GF(2^128) verdoppelt wird. Der letzte (moeglicherweise unvollstaendige)
//! Block wird ueber ein Laengen-Pad verrechnet; der Tag entsteht aus der
//! Checksumme unter dem verdreifachten Delta.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt};
use aes::Aes128;

/// AES-Blockgroesse in Bytes
pub const BLOCK_GROESSE: usize = 16;

pub type Block = [u8; BLOCK_GROESSE];

#[inline]
fn xor(ziel: &mut Block, quelle: &Block) {
    for i in 0..BLOCK_GROESSE {
        ziel[i] ^= quelle[i];
    }
}

/// Verdopplung in GF(2^128) mit Reduktionspolynom x^128 + x^7 + x^2 + x + 1
#[inline]
fn times2(block: &mut Block) {
    let uebertrag = block[0] >> 7;
    for i in 0..BLOCK_GROESSE - 1 {
        block[i] = (block[i] << 1) | (block[i + 1] >> 7);
    }
    block[BLOCK_GROESSE - 1] = (block[BLOCK_GROESSE - 1] << 1) ^ (uebertrag * 0x87);
}

/// Verdreifachung: times3(x) = times2(x) ^ x
#[inline]
fn times3(block: &mut Block) {
    let original = *block;
    times2(block);
    xor(block, &original);
}

#[inline]
fn aes_block_verschluesseln(cipher: &Aes128, block: &Block) -> Block {
    let mut ga = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut ga);
    ga.into()
}

#[inline]
fn aes_block_entschluesseln(cipher: &Aes128, block: &Block) -> Block {
    let mut ga = GenericArray::clone_from_slice(block);
    cipher.decrypt_block(&mut ga);
    ga.into()
}

/// OCB2-Verschluesselung
///
/// Haengt den Geheimtext an `ziel` an und schreibt den vollen 16-Byte-Tag
/// nach `tag` (das Drahtformat verwendet davon die ersten 3 Bytes).
pub fn ocb_verschluesseln(
    cipher: &Aes128,
    nonce: &Block,
    klartext: &[u8],
    ziel: &mut Vec<u8>,
    tag: &mut Block,
) {
    let mut delta = aes_block_verschluesseln(cipher, nonce);
    let mut checksumme: Block = [0u8; BLOCK_GROESSE];

    let mut rest = klartext;
    while rest.len() > BLOCK_GROESSE {
        times2(&mut delta);

        let mut block: Block = rest[..BLOCK_GROESSE].try_into().unwrap();
        xor(&mut checksumme, &block);

        xor(&mut block, &delta);
        let mut ausgabe = aes_block_verschluesseln(cipher, &block);
        xor(&mut ausgabe, &delta);
        ziel.extend_from_slice(&ausgabe);

        rest = &rest[BLOCK_GROESSE..];
    }

    // Letzter Block: Laengen-Pad, XOR-Stromchiffre
    times2(&mut delta);
    let bits = (rest.len() * 8) as u16;
    let mut laengen_block: Block = [0u8; BLOCK_GROESSE];
    laengen_block[BLOCK_GROESSE - 2] = (bits >> 8) as u8;
    laengen_block[BLOCK_GROESSE - 1] = bits as u8;
    xor(&mut laengen_block, &delta);
    let pad = aes_block_verschluesseln(cipher, &laengen_block);

    let mut letzter: Block = pad;
    letzter[..rest.len()].copy_from_slice(rest);
    xor(&mut checksumme, &letzter);
    xor(&mut letzter, &pad);
    ziel.extend_from_slice(&letzter[..rest.len()]);

    times3(&mut delta);
    xor(&mut checksumme, &delta);
    *tag = aes_block_verschluesseln(cipher, &checksumme);
}

/// OCB2-Entschluesselung
///
/// Haengt den Klartext an `ziel` an und berechnet den erwarteten Tag;
/// der Aufrufer vergleicht ihn mit dem empfangenen Tag.
pub fn ocb_entschluesseln(
    cipher: &Aes128,
    nonce: &Block,
    geheimtext: &[u8],
    ziel: &mut Vec<u8>,
    tag: &mut Block,
) {
    let mut delta = aes_block_verschluesseln(cipher, nonce);
    let mut checksumme: Block = [0u8; BLOCK_GROESSE];

    let mut rest = geheimtext;
    while rest.len() > BLOCK_GROESSE {
        times2(&mut delta);

        let mut block: Block = rest[..BLOCK_GROESSE].try_into().unwrap();
        xor(&mut block, &delta);
        let mut klar = aes_block_entschluesseln(cipher, &block);
        xor(&mut klar, &delta);

        xor(&mut checksumme, &klar);
        ziel.extend_from_slice(&klar);

        rest = &rest[BLOCK_GROESSE..];
    }

    times2(&mut delta);
    let bits = (rest.len() * 8) as u16;
    let mut laengen_block: Block = [0u8; BLOCK_GROESSE];
    laengen_block[BLOCK_GROESSE - 2] = (bits >> 8) as u8;
    laengen_block[BLOCK_GROESSE - 1] = bits as u8;
    xor(&mut laengen_block, &delta);
    let pad = aes_block_verschluesseln(cipher, &laengen_block);

    let mut letzter: Block = [0u8; BLOCK_GROESSE];
    letzter[..rest.len()].copy_from_slice(rest);
    for i in 0..rest.len() {
        letzter[i] ^= pad[i];
    }
    // Checksumme laeuft ueber Klartext + Pad-Rest
    let mut voll = letzter;
    voll[rest.len()..].copy_from_slice(&pad[rest.len()..]);
    xor(&mut checksumme, &voll);
    ziel.extend_from_slice(&letzter[..rest.len()]);

    times3(&mut delta);
    xor(&mut checksumme, &delta);
    *tag = aes_block_verschluesseln(cipher, &checksumme);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
